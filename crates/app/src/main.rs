use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use mediabus_core::{
    BusConfig, BusError, Command, CommandContext, Event, EventKind, EventPayload, Format, Handle,
    Value,
};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => BusConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BusConfig::default(),
    };

    match cli.command {
        Commands::Demo { seeks } => run_demo(config, seeks),
        Commands::Script {
            input,
            messages,
            options,
        } => run_script(config, &input, &messages, options.as_deref()),
    }
}

fn run_demo(config: BusConfig, seeks: u32) -> anyhow::Result<()> {
    tracing::info!(seeks, "starting demo session");

    let main = Handle::with_config(config)?;
    main.set_option_string("demo-seeks", &seeks.to_string())?;
    main.declare_property("volume", Some(Value::Int64(100)), true)?;
    main.declare_property("time-pos", Some(Value::Double(0.0)), false)?;
    main.register_command("seek", seek)?;
    main.initialize()?;

    let monitor = main.create_weak_client(Some("monitor"))?;
    monitor.request_log_messages("info")?;
    monitor.observe_property(1, "volume", Format::Int64)?;
    monitor.observe_property(2, "time-pos", Format::Double)?;
    monitor.hook_add(3, "on_before_seek", 0)?;
    let printer = thread::Builder::new()
        .name("monitor".to_string())
        .spawn(move || drain(monitor))?;

    for step in 0..seeks {
        let target = f64::from(step) * 10.0;
        main.command(&Value::List(vec![Value::from("seek"), Value::Double(target)]))?;
        main.set_property("volume", 100 - i64::from(step))?;
        thread::sleep(Duration::from_millis(20));
    }
    main.command_async(42, Value::args(["print-text", "demo finished"]))?;
    main.wait_async_requests();
    drain_pending(&main);

    main.destroy();
    printer
        .join()
        .map_err(|_| anyhow!("monitor thread panicked"))?;
    Ok(())
}

/// Demo command: runs the `on_before_seek` hook, then moves the playback
/// position.
fn seek(ctx: &mut CommandContext<'_>, command: &Command) -> mediabus_core::Result<Value> {
    let target = command
        .require(0, "target")?
        .convert(Format::Double)?
        .as_f64()
        .ok_or(BusError::InvalidParameter)?;
    ctx.run_hook("on_before_seek");
    ctx.emit(EventKind::Seek)?;
    ctx.update_property("time-pos", Some(Value::Double(target)))?;
    ctx.emit(EventKind::PlaybackRestart)?;
    Ok(Value::Double(target))
}

fn drain(handle: Handle) {
    loop {
        let event = handle.wait_event(None);
        print_event(handle.client_name(), &event);
        if event.kind == EventKind::Shutdown {
            break;
        }
        if let EventPayload::Hook { id, .. } = event.payload {
            if let Err(err) = handle.hook_continue(id) {
                tracing::warn!(error = %err, "failed to continue hook");
            }
        }
    }
    handle.destroy();
}

fn run_script(
    config: BusConfig,
    input: &Path,
    messages: &str,
    options: Option<&Path>,
) -> anyhow::Result<()> {
    tracing::info!(?input, "running command script");

    let text = std::fs::read_to_string(input)
        .with_context(|| format!("reading script {}", input.display()))?;
    let json: serde_json::Value = serde_json::from_str(&text).context("parsing script")?;
    let serde_json::Value::Array(commands) = json else {
        bail!("script must be a JSON array of commands");
    };

    let handle = Handle::with_config(config)?;
    if let Some(path) = options {
        let applied = handle
            .load_config_file(path)
            .with_context(|| format!("loading options from {}", path.display()))?;
        tracing::info!(applied, "options applied");
    }
    handle.initialize()?;
    handle.request_log_messages(messages)?;

    for (index, command) in commands.into_iter().enumerate() {
        let outcome = match &command {
            serde_json::Value::String(line) => handle.command_string(line),
            other => handle.command(&Value::from(other.clone())),
        };
        let mut report = Value::map([("command", Value::from(command))]);
        match outcome {
            Ok(result) => {
                report.insert("result", result);
            }
            Err(err) => {
                tracing::warn!(index, error = %err, "command failed");
                report.insert("error", Value::from(err.to_string()));
            }
        }
        println!("{}", report.to_json());

        if drain_pending(&handle) {
            break;
        }
    }
    handle.destroy();
    Ok(())
}

/// Prints every queued event without blocking. Returns whether the engine
/// asked this handle to shut down.
fn drain_pending(handle: &Handle) -> bool {
    let mut shutdown = false;
    loop {
        let event = handle.wait_event(Some(Duration::ZERO));
        if event.is_none() {
            return shutdown;
        }
        shutdown |= event.kind == EventKind::Shutdown;
        print_event(handle.client_name(), &event);
    }
}

fn print_event(client: &str, event: &Event) {
    if event.is_none() {
        return;
    }
    let mut value = event.to_value();
    value.insert("client", Value::from(client));
    println!("{}", value.to_json());
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive a media control bus from the command line", long_about = None)]
struct Cli {
    /// JSON file with bus configuration overrides.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scripted session with a monitoring client and print its events.
    Demo {
        /// Number of seeks to perform.
        #[arg(short, long, default_value_t = 3)]
        seeks: u32,
    },
    /// Execute every command of a JSON script and print results and events.
    Script {
        /// Path to a JSON array of commands. Each is an array, an object
        /// with a `name` entry, or a text command line.
        input: PathBuf,
        /// Option file applied before the engine starts.
        #[arg(short, long)]
        options: Option<PathBuf>,
        /// Minimum level of bus log messages to print.
        #[arg(short, long, default_value = "info")]
        messages: String,
    },
}
