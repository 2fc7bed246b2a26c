//! Relay loop.
//!
//! One task owns the registry, the task supervisor and the subscription
//! store. Bus events, chat messages and the supervisor tick are handled
//! one at a time from a single `select!`, so sensor state is never touched
//! concurrently. Slow work (chat delivery, shell commands) is spawned and
//! never awaited inline.

use crate::bus::{BusEvent, TopicSubscriber};
use crate::chat::{ChatMessage, Inbound};
use crate::commands::CommandInterpreter;
use crate::dispatch::Dispatcher;
use crate::router;
use crate::sensors::Registry;
use crate::store::SubscriptionStore;
use crate::tasks::TaskSupervisor;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

pub struct Relay {
    registry: Registry,
    interpreter: CommandInterpreter,
    supervisor: TaskSupervisor,
    dispatcher: Dispatcher,
    bus: Arc<dyn TopicSubscriber>,
    store: Option<SubscriptionStore>,
    poll_interval: Duration,
}

impl Relay {
    /// Every recipient already subscribed in `registry` is allowed as a
    /// notification target.
    pub fn new(
        registry: Registry,
        interpreter: CommandInterpreter,
        mut dispatcher: Dispatcher,
        bus: Arc<dyn TopicSubscriber>,
    ) -> Self {
        for sensor in registry.iter() {
            for recipient in sensor.subscriptions() {
                dispatcher.allow(*recipient);
            }
        }
        Self {
            registry,
            interpreter,
            supervisor: TaskSupervisor::new(),
            dispatcher,
            bus,
            store: None,
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Persist subscription changes to `store`.
    pub fn with_store(mut self, store: SubscriptionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Subscribe every sensor pattern once the broker accepted us.
    ///
    /// Subscribing runs in its own task: the bus client may be waiting on
    /// the relay to drain bus events, so it is never awaited here.
    pub fn on_connect(&self, code: u8) {
        if code != 0 {
            warn!("[MQTT] Broker refused connection (code {})", code);
            return;
        }
        let patterns: Vec<String> = self.registry.topics().into_iter().map(String::from).collect();
        info!("[MQTT] Connected, subscribing {} pattern(s)", patterns.len());

        let bus = self.bus.clone();
        tokio::spawn(async move {
            for pattern in &patterns {
                if let Err(e) = bus.subscribe(pattern).await {
                    warn!("[MQTT] Failed to subscribe to {}: {}", pattern, e);
                }
            }
        });
    }

    /// Route one bus message and fan out any resulting notification.
    pub fn on_message(&mut self, topic: &str, payload: &[u8], retain: bool) {
        if let Some(event) = router::route(&mut self.registry, topic, payload, retain, Utc::now()) {
            self.dispatcher.notify(&event);
        }
    }

    /// Interpret one chat message. Returns whether a command consumed it.
    ///
    /// A chat where an admin ran a command becomes a notification target,
    /// so subscriptions made from a group chat are delivered there.
    pub fn on_chat(&mut self, message: &ChatMessage) -> bool {
        let outcome = self
            .interpreter
            .handle(message, &mut self.registry, &mut self.supervisor);

        if outcome.handled && self.dispatcher.allow(message.chat) {
            debug!("[Chat] Chat {} added as notification target", message.chat);
        }

        if outcome.subscriptions_changed {
            if let Some(store) = &self.store {
                store.save(&self.registry);
            }
        }
        self.dispatcher.dispatch(outcome.replies);

        if !outcome.handled {
            debug!("[Chat] Unhandled message from {}: {}", message.sender, message.text);
        }
        outcome.handled
    }

    /// Reap finished background tasks and deliver their output.
    pub async fn on_tick(&mut self) {
        if self.supervisor.is_empty() {
            return;
        }
        let replies = self.supervisor.reap().await;
        self.dispatcher.dispatch(replies);
    }

    /// Interpret an inbound message and report the outcome to the transport.
    pub fn on_inbound(&mut self, inbound: Inbound) {
        let handled = self.on_chat(&inbound.message);
        inbound.complete(handled);
    }

    fn on_bus(&mut self, event: BusEvent) {
        match event {
            BusEvent::Connected(code) => self.on_connect(code),
            BusEvent::Message {
                topic,
                payload,
                retain,
            } => self.on_message(&topic, &payload, retain),
        }
    }

    /// Run until both event sources are closed.
    pub async fn run(
        mut self,
        mut bus_rx: mpsc::Receiver<BusEvent>,
        mut chat_rx: mpsc::Receiver<Inbound>,
    ) {
        info!(
            "Relay running with {} sensor(s), {} admin(s)",
            self.registry.len(),
            self.dispatcher.allowed().len()
        );

        // interval() rejects a zero period
        let period = self.poll_interval.max(Duration::from_millis(1));
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut bus_open = true;
        let mut chat_open = true;

        while bus_open || chat_open {
            tokio::select! {
                event = bus_rx.recv(), if bus_open => match event {
                    Some(event) => self.on_bus(event),
                    None => {
                        warn!("[MQTT] Bus event channel closed");
                        bus_open = false;
                    }
                },
                message = chat_rx.recv(), if chat_open => match message {
                    Some(inbound) => self.on_inbound(inbound),
                    None => {
                        warn!("[Chat] Chat channel closed");
                        chat_open = false;
                    }
                },
                _ = tick.tick() => self.on_tick().await,
            }
        }

        info!("Relay stopped");
    }
}
