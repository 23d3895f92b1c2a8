use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use the_control::applog::FileAppLog;
use the_control::channel::{Intent, Mailbox, WallpaperCommand};
use the_control::config::{self, Config};
use the_control::guard;
use the_control::logging;
use the_control::paths::DataPaths;
use the_control::process::system::SystemTable;
use the_control::runtime::{self, Delivery};
use the_control::startup;
use the_control::status::{self, SupervisorStatus};
use the_control::store;
use the_control::wallpaper::{daemon, WallpaperSettings, WallpaperStyle};

/// How long a wallpaper command waits for the daemon to take the previous one.
const WALLPAPER_POST_WAIT: Duration = Duration::from_secs(2);

/// Keeps background apps and the wallpaper daemon in the state you want.
#[derive(Debug, Parser)]
#[command(name = "control", version)]
struct Cli {
    /// Defaults to `run`.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the supervisor.
    Run,
    /// Show supervisor and wallpaper status.
    Status,
    /// Turn an app on.
    Start { app: String },
    /// Turn an app off, stopping its whole process tree.
    Stop { app: String },
    /// Flip an app between on and off.
    Toggle { app: String },
    #[command(subcommand)]
    Profile(ProfileCommand),
    #[command(subcommand)]
    Wallpaper(WallpaperAction),
    /// Launch the supervisor at login.
    Autostart {
        #[arg(value_enum)]
        switch: Switch,
    },
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    /// List profiles; `*` marks the last applied one.
    List,
    /// Apply a profile to the apps it lists.
    Apply { name: String },
    /// Forget the last applied profile. No app is touched.
    Clear,
}

#[derive(Debug, Subcommand)]
enum WallpaperAction {
    Pause,
    Resume,
    Toggle,
    Next,
    /// Make the daemon re-read its settings file.
    Reload,
    /// Stop the daemon and keep it off.
    Quit,
    Status,
    /// Change and save the daemon settings, then reload a running daemon.
    Configure(ConfigureArgs),
}

#[derive(Debug, Args)]
struct ConfigureArgs {
    #[arg(long)]
    folder: Option<PathBuf>,
    /// Seconds between changes.
    #[arg(long)]
    interval: Option<u64>,
    #[arg(long, value_enum)]
    style: Option<WallpaperStyle>,
    #[arg(long)]
    shuffle: Option<bool>,
    #[arg(long)]
    recursive: Option<bool>,
    #[arg(long)]
    once: Option<bool>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── App data directory ────────────────────────────────────────────────────
    let paths = DataPaths::discover();
    paths
        .ensure()
        .with_context(|| format!("Failed to create data directory {}", paths.root().display()))?;

    // ── Configuration ─────────────────────────────────────────────────────────
    let config = config::load_or_default(&paths.config()).unwrap_or_else(|e| {
        eprintln!("[config] Error (using defaults): {e:#}");
        Config::default()
    });
    logging::init(&config.logging.level, &paths.supervisor_log());

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => runtime::run(paths, config).await,
        Command::Status => {
            print_status(&paths);
            Ok(())
        }
        Command::Start { app } => send(&paths, &config, Intent::Start { app }).await,
        Command::Stop { app } => send(&paths, &config, Intent::Stop { app }).await,
        Command::Toggle { app } => send(&paths, &config, Intent::Toggle { app }).await,
        Command::Profile(ProfileCommand::List) => list_profiles(&paths),
        Command::Profile(ProfileCommand::Apply { name }) => {
            send(&paths, &config, Intent::ApplyProfile { profile: name }).await
        }
        Command::Profile(ProfileCommand::Clear) => send(&paths, &config, Intent::ClearProfile).await,
        Command::Wallpaper(action) => wallpaper(&paths, &config, action).await,
        Command::Autostart { switch } => autostart(&paths, switch),
    }
}

async fn send(paths: &DataPaths, config: &Config, intent: Intent) -> Result<()> {
    let log = Box::new(FileAppLog::new(paths.app_log_dir()));
    let grace = config.supervisor.effective_grace();
    report(runtime::deliver(paths, SystemTable::new(), log, grace, intent).await?);
    Ok(())
}

fn report(delivery: Delivery) {
    match delivery {
        Delivery::Applied(summary) => println!("{summary}"),
        Delivery::Posted { pid, replaced } => {
            match pid {
                Some(pid) => println!("sent to the running supervisor (pid {pid})"),
                None => println!("sent to the running supervisor"),
            }
            if replaced {
                eprintln!("warning: an earlier command had not been picked up yet and was replaced");
            }
        }
    }
}

fn print_status(paths: &DataPaths) {
    if guard::is_running(runtime::GUARD_NAME, paths.root()) {
        match status::read_status::<SupervisorStatus>(&paths.supervisor_status()) {
            Some(s) => print!("{}", status::render_supervisor(&s)),
            None => println!("supervisor running; no status published yet"),
        }
    } else {
        println!("supervisor: not running");
    }
    if guard::is_running(daemon::GUARD_NAME, paths.root()) {
        match daemon::read_status(&paths.wallpaper_status()) {
            Some(s) => println!("{}", status::render_wallpaper(&s)),
            None => println!("wallpaper: running; no status published yet"),
        }
    } else {
        println!("wallpaper: not running");
    }
}

fn list_profiles(paths: &DataPaths) -> Result<()> {
    let profiles = store::load_profiles(&paths.profiles())?;
    let last = store::load_state(&paths.state())?.last_profile;
    if profiles.is_empty() {
        println!("no profiles defined in {}", paths.profiles().display());
    }
    for profile in profiles {
        let marker = if last.as_deref() == Some(profile.name.as_str()) { '*' } else { ' ' };
        let on = profile.states.values().filter(|s| s.is_on()).count();
        let off = profile.states.len() - on;
        println!("{marker} {:<20} {on} on, {off} off", profile.name);
    }
    Ok(())
}

async fn wallpaper(paths: &DataPaths, config: &Config, action: WallpaperAction) -> Result<()> {
    let running = guard::is_running(daemon::GUARD_NAME, paths.root());
    let command = match action {
        WallpaperAction::Pause => WallpaperCommand::Pause,
        WallpaperAction::Resume => WallpaperCommand::Resume,
        WallpaperAction::Toggle => WallpaperCommand::Toggle,
        WallpaperAction::Next => WallpaperCommand::Next,
        WallpaperAction::Reload => WallpaperCommand::Reload,
        WallpaperAction::Quit => {
            let log = Box::new(FileAppLog::new(paths.app_log_dir()));
            let grace = config.supervisor.effective_grace();
            match runtime::quit_wallpaper(paths, SystemTable::new(), log, grace, WALLPAPER_POST_WAIT).await? {
                Some(delivery) => report(delivery),
                None if running => println!("wallpaper: asked to quit"),
                None => println!("wallpaper: not running"),
            }
            return Ok(());
        }
        WallpaperAction::Status => {
            match daemon::read_status(&paths.wallpaper_status()).filter(|_| running) {
                Some(s) => println!("{}", status::render_wallpaper(&s)),
                None => println!("wallpaper: not running"),
            }
            return Ok(());
        }
        WallpaperAction::Configure(args) => {
            configure(paths, args)?;
            if !running {
                return Ok(());
            }
            WallpaperCommand::Reload
        }
    };
    if !running {
        bail!("the wallpaper daemon is not running");
    }
    let mailbox = Mailbox::<WallpaperCommand>::new(paths.wallpaper_mailbox());
    if !mailbox.post_when_free(command, WALLPAPER_POST_WAIT).await? {
        eprintln!("warning: an earlier wallpaper command had not been picked up yet and was replaced");
    }
    Ok(())
}

fn configure(paths: &DataPaths, args: ConfigureArgs) -> Result<()> {
    let path = paths.wallpaper_settings();
    let mut settings = WallpaperSettings::load(&path)?;
    if let Some(folder) = args.folder {
        settings.folder = folder;
    }
    if let Some(interval) = args.interval {
        settings.interval = interval;
    }
    if let Some(style) = args.style {
        settings.style = style;
    }
    if let Some(shuffle) = args.shuffle {
        settings.shuffle = shuffle;
    }
    if let Some(recursive) = args.recursive {
        settings.recursive = recursive;
    }
    if let Some(once) = args.once {
        settings.once = once;
    }
    settings.validate()?;
    settings.save(&path)?;
    println!("saved {}", path.display());
    Ok(())
}

fn autostart(paths: &DataPaths, switch: Switch) -> Result<()> {
    let enabled = matches!(switch, Switch::On);
    let mut state = store::load_state(&paths.state())?;
    state.autostart = enabled;
    store::save_state(&paths.state(), &state)?;
    startup::sync(enabled)?;
    println!("autostart {}", if enabled { "on" } else { "off" });
    Ok(())
}
