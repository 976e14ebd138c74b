use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use droid_config::{Config, CorrelationMode, FaultPolicySetting};
use droid_device::{AdbBridge, Device, Process, RefreshOutcome};
use droid_mi::protocol::quote;
use droid_mi::{
    ClientOptions, ClientState, Correlation, FaultPolicy, MiError, ProtocolClient, StackFrame,
    StreamKind, ThreadStackCache,
};
use droid_platform::{DefaultPaths, PlatformPaths, ToolLocator};
use droid_session::{JdwpSetup, SessionOptions, SessionSetup};

use crate::cli::Command;

pub async fn execute(command: Command, config: Config, paths: DefaultPaths) -> Result<()> {
    let config = Arc::new(config);
    match command {
        Command::Props { key } => props(config, key).await,
        Command::Ps { name, pid, json } => ps(config, name, pid, json).await,
        Command::Setup { process } => {
            let setup = prepare_session(config, &paths, process).await?;
            for line in &setup.script {
                println!("{line}");
            }
            println!("# target remote {}", setup.session.config().endpoint());
            Ok(())
        }
        Command::Gdb { process } => gdb(config, &paths, process).await,
        Command::Jdwp { process } => jdwp(config, process).await,
        Command::Teardown => {
            let device = blocking({
                let config = config.clone();
                move || connect(&config)
            })
            .await?;
            blocking(move || {
                device
                    .bridge()
                    .clear_all_forwards()
                    .context("failed to remove port forwards")
            })
            .await?;
            println!("forwards cleared");
            Ok(())
        }
    }
}

/// Run a device call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("blocking task panicked")?
}

/// Resolve `adb`, pick the device and load its properties.
fn connect(config: &Config) -> Result<Arc<Device>> {
    let adb = ToolLocator::adb(config.adb.path.clone())
        .resolve("adb")
        .context("adb not found")?;
    let timeout = Duration::from_millis(config.adb.timeout_ms);

    let serial = match &config.adb.serial {
        Some(serial) => serial.clone(),
        None => {
            let devices = AdbBridge::list_devices(&adb, timeout).context("failed to list devices")?;
            match devices.as_slice() {
                [only] => only.clone(),
                [] => bail!("no device attached"),
                _ => bail!(
                    "{} devices attached ({}); pick one with --serial",
                    devices.len(),
                    devices.join(", ")
                ),
            }
        }
    };

    let bridge = Arc::new(AdbBridge::new(adb, Some(serial.clone())));
    Device::connect_with_timeout(serial.clone(), bridge, timeout)
        .with_context(|| format!("failed to connect to {serial}"))
}

/// Refresh the process list and return the first process named `name`.
fn find_process(device: &Device, name: &str) -> Result<Arc<Process>> {
    let registry = device.processes();
    if let RefreshOutcome::Skipped = registry.refresh(None)? {
        tracing::warn!("empty process listing, using previous snapshot");
    }
    let pid = registry
        .ids_by_name(name)
        .into_iter()
        .min()
        .ok_or_else(|| anyhow!("no process named {name} on {}", device.id()))?;
    registry
        .process_by_id(pid)
        .ok_or_else(|| anyhow!("process {pid} vanished"))
}

async fn props(config: Arc<Config>, key: Option<String>) -> Result<()> {
    let device = blocking(move || connect(&config)).await?;
    match key {
        Some(key) => match device.property(&key) {
            Some(value) => println!("{value}"),
            None => bail!("property {key} is not set"),
        },
        None => {
            let properties = device.properties();
            let mut keys: Vec<_> = properties.keys().collect();
            keys.sort();
            for key in keys {
                println!("[{key}]: [{}]", properties[key]);
            }
        }
    }
    Ok(())
}

async fn ps(config: Arc<Config>, name: Option<String>, pid: Option<u32>, json: bool) -> Result<()> {
    let snapshot = blocking(move || {
        let device = connect(&config)?;
        device.processes().refresh(pid)?;
        Ok(device.processes().snapshot())
    })
    .await?;

    let mut processes: Vec<&Process> = snapshot
        .processes()
        .map(Arc::as_ref)
        .filter(|p| name.as_deref().map_or(true, |n| p.name == n))
        .collect();
    processes.sort_by_key(|p| p.pid);

    if json {
        println!("{}", serde_json::to_string_pretty(&processes)?);
        return Ok(());
    }
    println!("{:<10} {:>6} {:>6} {:>10} {:>8} {:<2} NAME", "USER", "PID", "PPID", "VSIZE", "RSS", "S");
    for p in processes {
        println!(
            "{:<10} {:>6} {:>6} {:>10} {:>8} {:<2} {}",
            p.user, p.pid, p.ppid, p.vsize, p.rss, p.state, p.name
        );
    }
    Ok(())
}

struct PreparedSession {
    session: Arc<SessionSetup>,
    script: Vec<String>,
}

async fn prepare_session(
    config: Arc<Config>,
    paths: &DefaultPaths,
    process: String,
) -> Result<PreparedSession> {
    let cache_root = paths.cache_dir();
    blocking(move || {
        let device = connect(&config)?;
        let target = find_process(&device, &process)?;
        let options = SessionOptions {
            host: config.gdb.host.clone(),
            port: config.gdb.port,
            cache_root,
            library_paths: config.session.library_paths.clone(),
        };
        let session = SessionSetup::new(target, options)?;
        let script = session
            .prepare()
            .with_context(|| format!("session setup for {process} failed"))?;
        tracing::info!(process = %process, commands = script.len(), "session prepared");
        Ok(PreparedSession {
            session: Arc::new(session),
            script,
        })
    })
    .await
}

fn client_options(config: &Config) -> ClientOptions {
    ClientOptions {
        correlation: match config.gdb.correlation {
            CorrelationMode::Token => Correlation::Token,
            CorrelationMode::Fifo => Correlation::Fifo,
        },
        command_timeout: Some(Duration::from_millis(config.gdb.command_timeout_ms)),
        fault_policy: match config.gdb.fault_policy {
            FaultPolicySetting::AutoContinue => FaultPolicy::AutoContinue,
            FaultPolicySetting::Surface => FaultPolicy::Surface,
        },
        fault_signals: config.gdb.fault_signals.clone(),
    }
}

async fn gdb(config: Arc<Config>, paths: &DefaultPaths, process: String) -> Result<()> {
    let gdb_path = ToolLocator::gdb(config.gdb.path.clone())
        .resolve("gdb")
        .context("gdb not found")?;
    let prepared = prepare_session(config.clone(), paths, process).await?;

    let client = Arc::new(ProtocolClient::spawn(&gdb_path, client_options(&config))?);
    let printer = tokio::spawn(print_output(client.clone()));

    let outcome = drive_gdb(&client, &prepared).await;

    client.kill();
    printer.abort();
    let session = prepared.session.clone();
    blocking(move || session.teardown_tunnel().context("failed to remove tunnel")).await?;
    outcome
}

async fn drive_gdb(client: &Arc<ProtocolClient>, prepared: &PreparedSession) -> Result<()> {
    client
        .run_init_script(&prepared.script)
        .await
        .context("init script failed")?;
    let endpoint = prepared.session.config().endpoint();
    client
        .target_remote(&endpoint)
        .await
        .with_context(|| format!("failed to attach to {endpoint}"))?;
    let stacks = ThreadStackCache::attach(client.clone());

    println!("attached to {endpoint}; `bt <thread>`, `continue`, `interrupt`, `quit`");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("(droidbridge) ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match repl_command(client, &stacks, line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e @ (MiError::Disconnected | MiError::ConnectionClosed)) => {
                return Err(e).context("debugger went away");
            }
            Err(e) => println!("error: {e}"),
        }
    }
    Ok(())
}

/// Handle one REPL line. `Ok(false)` ends the session.
async fn repl_command(
    client: &ProtocolClient,
    stacks: &ThreadStackCache,
    line: &str,
) -> Result<bool, MiError> {
    let mut words = line.split_whitespace();
    match words.next() {
        None => {}
        Some("quit" | "q") => return Ok(false),
        Some("bt") => {
            let thread = words
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| MiError::InvalidCommand("usage: bt <thread>".into()))?;
            for frame in stacks.get_frames(thread).await?.iter() {
                println!("{}", format_frame(frame));
            }
        }
        Some("continue" | "c") => client.exec_continue().await?,
        Some("interrupt") => client.interrupt().await?,
        Some("state") => println!("{:?}", client.state()),
        Some(_) if line.starts_with('-') => {
            let record = client.send_command(line, None).await?;
            println!("^{}", record.class);
        }
        Some(_) => {
            client
                .send_command(&format!("-interpreter-exec console {}", quote(line)), None)
                .await?;
        }
    }
    Ok(true)
}

fn format_frame(frame: &StackFrame) -> String {
    let func = frame.func.as_deref().unwrap_or("??");
    let location = match (&frame.file, frame.line, &frame.from) {
        (Some(file), Some(line), _) => format!(" at {file}:{line}"),
        (_, _, Some(from)) => format!(" from {from}"),
        _ => String::new(),
    };
    format!("#{:<3} {} in {func}{location}", frame.level, frame.addr)
}

async fn print_output(client: Arc<ProtocolClient>) {
    let mut console = client.subscribe_console();
    let mut notes = client.subscribe_notifications();
    loop {
        tokio::select! {
            record = console.recv() => match record {
                Ok(record) if record.kind == StreamKind::Log => eprint!("{}", record.text),
                Ok(record) if record.kind == StreamKind::Program => println!("{}", record.text),
                Ok(record) => print!("{}", record.text),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "console output lagged"),
                Err(RecvError::Closed) => break,
            },
            note = notes.recv() => match note {
                Ok(note) if note.is_stopped() => {
                    let reason = note.field("reason").unwrap_or("unknown");
                    let thread = note.field("thread-id").unwrap_or("?");
                    println!("\n[stopped: {reason}, thread {thread}]");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "notifications lagged"),
                Err(RecvError::Closed) => break,
            },
        }
        if client.state() == ClientState::Disconnected {
            break;
        }
    }
}

async fn jdwp(config: Arc<Config>, process: String) -> Result<()> {
    let port = config.jdwp.port;
    let setup = blocking(move || {
        let device = connect(&config)?;
        let target = find_process(&device, &process)?;
        let setup = JdwpSetup::new(target, port)?;
        setup.establish_tunnel().context("failed to forward jdwp")?;
        Ok(Arc::new(setup))
    })
    .await?;

    let args = setup.attach_args();
    let jdb = match ToolLocator::jdb().resolve("jdb") {
        Ok(jdb) => jdb,
        Err(e) => {
            tracing::warn!(error = %e, "jdb not found, leaving tunnel in place");
            println!("jdwp forwarded; attach with: jdb {}", args.join(" "));
            return Ok(());
        }
    };

    let status = tokio::process::Command::new(&jdb)
        .args(&args)
        .status()
        .await
        .with_context(|| format!("failed to run {}", jdb.display()));
    blocking(move || setup.teardown_tunnel().context("failed to remove tunnel")).await?;
    let status = status?;
    if !status.success() {
        bail!("jdb exited with {status}");
    }
    Ok(())
}
