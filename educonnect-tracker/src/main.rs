mod device;
mod updates;

use std::{path::PathBuf, result::Result as StdResult};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use educonnect_logic::{
    LocationController, SessionSubject, StateUpdateSender, SubjectProvider, SubmitAttempt,
    SubmissionOutcome, TrackingSettings, fetch_latest_location,
};
use educonnect_store::{RemoteSession, RestLocationStore, StoreConfig};
use log::{error, info, warn};

use device::FixedDevice;
use updates::FixForwarder;

type Result<T = (), E = anyhow::Error> = StdResult<T, E>;

#[derive(Parser)]
struct Cli {
    /// Base URL of the store, defaults to SUPABASE_URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// API key for the store, defaults to SUPABASE_KEY
    #[arg(long, global = true)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DeviceArgs {
    /// Id of the student to send locations for
    #[arg(long, conflicts_with = "access_token", required_unless_present = "access_token")]
    student: Option<String>,

    /// Access token of the signed-in student, their id is looked up from it
    #[arg(long)]
    access_token: Option<String>,

    /// Latitude reported by the simulated device
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    /// Longitude reported by the simulated device
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    /// Accuracy in meters reported by the simulated device
    #[arg(long)]
    accuracy: Option<f64>,

    /// JSON file with tracking settings
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the store is reachable with the configured key
    Check,
    /// Print the newest stored location of a student
    Latest {
        /// The student's id
        student: String,
    },
    /// Get one location and send it
    Send(DeviceArgs),
    /// Keep tracking and send every new location until interrupted
    Track(DeviceArgs),
}

/// Either a fixed student id or a session resolved from an access token
enum CliSubject {
    Fixed(SessionSubject),
    Remote(RemoteSession),
}

impl SubjectProvider for CliSubject {
    async fn current_subject(&self) -> Option<String> {
        match self {
            Self::Fixed(session) => session.current_subject().await,
            Self::Remote(session) => session.current_subject().await,
        }
    }
}

type Controller<U> = LocationController<FixedDevice, RestLocationStore, CliSubject, U>;

fn store_config(cli: &Cli) -> StoreConfig {
    let mut config = StoreConfig::from_env();
    if let Some(url) = &cli.url {
        config.url = url.trim_end_matches('/').to_string();
    }
    if let Some(key) = &cli.key {
        config.api_key = key.clone();
    }
    config
}

fn load_settings(path: Option<&PathBuf>) -> Result<TrackingSettings> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            let settings: TrackingSettings =
                serde_json::from_str(&raw).context("Invalid settings file")?;
            settings.validate().context("Invalid settings file")?;
            Ok(settings)
        }
        None => Ok(TrackingSettings::default()),
    }
}

fn mk_controller<U: StateUpdateSender>(
    config: StoreConfig,
    args: &DeviceArgs,
    updates: U,
) -> Result<Controller<U>> {
    let settings = load_settings(args.settings.as_ref())?;
    let device = FixedDevice::new(args.lat, args.lon, args.accuracy)?;
    let store = RestLocationStore::new(config.clone())?;
    let subject = match (&args.student, &args.access_token) {
        (_, Some(token)) => CliSubject::Remote(RemoteSession::new(config, token.clone())?),
        (Some(id), None) => CliSubject::Fixed(SessionSubject::signed_in(id.clone())),
        (None, None) => bail!("Either --student or --access-token is required"),
    };

    Ok(LocationController::new(settings, device, store, subject, updates))
}

struct NoUpdates;

impl StateUpdateSender for NoUpdates {
    fn send_update(&self) {}
}

async fn check(config: StoreConfig) -> Result {
    let store = RestLocationStore::new(config)?;
    match store.check_connection().await? {
        Some(id) => println!("Connection successful. Sample user ID: {id}"),
        None => {
            warn!("No users found in the database");
            println!("Connection successful.");
        }
    }
    Ok(())
}

async fn latest(config: StoreConfig, student: &str) -> Result {
    let store = RestLocationStore::new(config)?;
    match fetch_latest_location(&store, student).await? {
        Some(record) => println!(
            "{} at {:.6}, {:.6}{}",
            record.timestamp.to_rfc3339(),
            record.latitude,
            record.longitude,
            record
                .accuracy
                .map(|a| format!(" (accuracy {a:.2} m)"))
                .unwrap_or_default()
        ),
        None => println!("No location stored for {student}"),
    }
    Ok(())
}

async fn send(config: StoreConfig, args: DeviceArgs) -> Result {
    let controller = mk_controller(config, &args, NoUpdates)?;

    controller.request_location().await;
    let state = controller.get_ui_state().await;
    if let Some(err) = state.error {
        bail!("Couldn't get a location: {err}");
    }

    let res = controller.submit().await;
    controller.shutdown();

    match res {
        SubmitAttempt::Finished(SubmissionOutcome::Sent) => {
            println!("Location sent");
            Ok(())
        }
        SubmitAttempt::Finished(SubmissionOutcome::Failed(why)) | SubmitAttempt::Rejected(why) => {
            bail!("Error sending location: {why}")
        }
        SubmitAttempt::AlreadySending | SubmitAttempt::ShutDown => {
            bail!("Location was not sent")
        }
    }
}

async fn track(config: StoreConfig, args: DeviceArgs) -> Result {
    let (updates, mut fixes) = FixForwarder::new();
    let controller = std::sync::Arc::new(mk_controller(config, &args, updates)?);

    info!(
        "Tracking every {} seconds, press Ctrl-C to stop",
        controller.settings().poll_interval_seconds
    );

    let mut main_loop = tokio::spawn({
        let controller = controller.clone();
        async move { controller.main_loop().await }
    });

    let mut loop_result = None;

    loop {
        tokio::select! {
            Ok(_) = tokio::signal::ctrl_c() => {
                break;
            }
            res = &mut main_loop => {
                warn!("Tracking loop ended on its own");
                loop_result = Some(res);
                break;
            }
            fix = fixes.recv() => {
                if fix.is_none() {
                    break;
                }
                match controller.submit().await {
                    SubmitAttempt::Finished(SubmissionOutcome::Sent) => info!("Location sent"),
                    SubmitAttempt::Finished(SubmissionOutcome::Failed(why))
                    | SubmitAttempt::Rejected(why) => error!("Error sending location: {why}"),
                    SubmitAttempt::AlreadySending => warn!("Still sending the previous location"),
                    SubmitAttempt::ShutDown => break,
                }
            }
        }
    }

    controller.shutdown();
    let res = match loop_result {
        Some(res) => res,
        None => main_loop.await,
    };
    res.context("Tracking loop panicked")?;

    let state = controller.get_ui_state().await;
    if let Some(last) = state.last_sent_time {
        info!("Last location sent at {last}");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result {
    colog::init();

    let cli = Cli::parse();
    let config = store_config(&cli);

    match cli.command {
        Commands::Check => check(config).await,
        Commands::Latest { student } => latest(config, &student).await,
        Commands::Send(args) => send(config, args).await,
        Commands::Track(args) => track(config, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("educonnect-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).expect("Failed to write settings");
        path
    }

    #[test]
    fn test_load_settings_rejects_zero_interval() {
        let path = settings_file("zero.json", r#"{ "poll_interval_seconds": 0 }"#);
        let res = load_settings(Some(&path));
        std::fs::remove_file(&path).ok();

        assert!(res.is_err());
    }

    #[test]
    fn test_load_settings_partial() {
        let path = settings_file("partial.json", r#"{ "poll_interval_seconds": 5 }"#);
        let res = load_settings(Some(&path));
        std::fs::remove_file(&path).ok();

        let settings = res.expect("Settings rejected");
        assert_eq!(settings.poll_interval_seconds, 5);
        assert!(settings.high_accuracy);
    }

    #[test]
    fn test_load_settings_default() {
        let settings = load_settings(None).expect("Default settings rejected");
        assert_eq!(settings, TrackingSettings::default());
    }
}
