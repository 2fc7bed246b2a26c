use clap::Parser;
use homebot::bus::{BusEvent, MqttClient};
use homebot::chat::{Inbound, TelegramClient};
use homebot::commands::{CommandInterpreter, CommandSettings};
use homebot::config::{self, Config};
use homebot::dispatch::Dispatcher;
use homebot::instance_lock::InstanceLock;
use homebot::relay::Relay;
use homebot::sensors::Registry;
use homebot::store::SubscriptionStore;
use log::{error, info};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "homebot")]
#[command(about = "Relays home sensor events from MQTT to Telegram")]
struct Cli {
    /// Load configuration from a JSON file
    #[arg(short, long, env = "HOMEBOT_CONFIG")]
    config: Option<PathBuf>,

    /// MQTT broker address, [mqtt://][user:pass@]host[:port]
    #[arg(short, long)]
    url: Option<String>,

    /// Telegram API bot token
    #[arg(long)]
    token: Option<String>,

    /// Admin chat id (repeatable)
    #[arg(long = "admin")]
    admins: Vec<i64>,

    /// Sensor URL, kind://name[!][@topic][?gap=N] (repeatable)
    #[arg(long = "sensors", num_args = 1..)]
    sensors: Vec<String>,

    /// Directory with YYYYMMDD_HHMMSS.mp4 recordings
    #[arg(long)]
    video_dir: Option<PathBuf>,

    /// URL that makes the camera take a snapshot
    #[arg(long)]
    snapshot_url: Option<String>,

    /// Log into this file instead of stderr
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Verbose logging
    #[arg(short)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) -> homebot::error::Result<()> {
        if let Some(url) = &self.url {
            config.mqtt.apply_url(url)?;
        }
        if let Some(token) = &self.token {
            config.telegram.token = token.clone();
        }
        if !self.admins.is_empty() {
            config.telegram.admins = self.admins.clone();
        }
        if !self.sensors.is_empty() {
            config.sensors = self.sensors.clone();
        }
        if let Some(dir) = &self.video_dir {
            config.video_dir = dir.clone();
        }
        if let Some(url) = &self.snapshot_url {
            config.snapshot_url = Some(url.clone());
        }
        Ok(())
    }
}

fn init_logger(verbose: bool, logfile: Option<&Path>) -> std::io::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    builder
        .format_timestamp_millis()
        .filter_module("reqwest", log::LevelFilter::Warn)
        .filter_module("hyper_util", log::LevelFilter::Warn);

    if let Some(path) = logfile {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn load_config(cli: &Cli) -> homebot::error::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env()?;
    cli.apply(&mut config)?;
    config.validate()?;
    Ok(config)
}

fn main() -> ExitCode {
    // Environment changes are only sound while the process is single-threaded
    config::load_dotenv(Path::new(".env"));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Cannot start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(start())
}

async fn start() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logger(cli.verbose, cli.logfile.as_deref()) {
        eprintln!("Cannot open log file: {}", e);
        return ExitCode::FAILURE;
    }
    info!("Starting homebot");

    let _lock = match InstanceLock::acquire() {
        Ok(lock) => lock,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&cli).await {
        Ok(()) => {
            info!("homebot stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> homebot::error::Result<()> {
    let config = load_config(cli)?;
    info!("Configuration loaded:");
    info!(
        "  MQTT broker: {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    info!("  Admins: {:?}", config.telegram.admins);
    info!("  Sensors: {}", config.sensors.join(", "));

    let admins: BTreeSet<i64> = config.telegram.admins.iter().copied().collect();

    let mut registry = Registry::from_urls(&config.sensors, config.trigger_gap_secs)?;
    let store = SubscriptionStore::new(config.state_path());
    store.restore(&mut registry, &admins);

    let telegram = Arc::new(TelegramClient::new(&config.telegram)?);
    let mqtt = MqttClient::new(&config.mqtt);
    let subscriber = Arc::new(mqtt.client());

    let (bus_tx, bus_rx) = mpsc::channel::<BusEvent>(64);
    let (chat_tx, chat_rx) = mpsc::channel::<Inbound>(64);

    let mqtt_task = tokio::spawn(mqtt.run(bus_tx));
    let chat_task = {
        let telegram = telegram.clone();
        tokio::spawn(async move { telegram.run(chat_tx).await })
    };

    let interpreter = CommandInterpreter::new(CommandSettings {
        admins: admins.clone(),
        shell: config.commands.clone(),
        video_dir: config.video_dir.clone(),
        snapshot_url: config.snapshot_url.clone(),
    });
    let relay = Relay::new(
        registry,
        interpreter,
        Dispatcher::new(telegram, admins),
        subscriber,
    )
    .with_store(store)
    .with_poll_interval(Duration::from_millis(config.task_poll_ms));

    info!("homebot is running, press Ctrl+C to exit");

    tokio::select! {
        _ = relay.run(bus_rx, chat_rx) => {
            error!("Relay loop ended");
        }
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        },
    }

    mqtt_task.abort();
    chat_task.abort();
    Ok(())
}
