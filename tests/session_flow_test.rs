use std::sync::Arc;
use std::time::Duration;

use droid_device::{BridgeCall, Device, ForwardTarget, RefreshOutcome, ScriptedBridge};
use droid_mi::{ClientOptions, ClientState, ProtocolClient, ThreadStackCache};
use droid_session::{SessionError, SessionOptions, SessionSetup, SetupStage};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const PS: &str = "\
USER     PID   PPID  VSIZE  RSS     WCHAN    PC         NAME
root      1     0     640    496   c00bd520 00019fb8 S /init
u0_a42    812   1     512000 31000 ffffffff 40012a10 S com.example.game
u0_a42    830   812   512000 31000 ffffffff 40012a10 S Thread-7
";

const PROPS: &str = "\
[ro.build.version.sdk]: [19]
[ro.product.cpu.abilist]: [armeabi-v7a,armeabi]
";

fn scripted_device() -> (Arc<ScriptedBridge>, Arc<Device>) {
    let bridge = Arc::new(ScriptedBridge::new());
    bridge
        .on_shell("getprop", PROPS)
        .on_shell("ps -t", PS)
        .with_remote_file("/system/bin/linker", b"\x7fELF linker".to_vec())
        .with_remote_file("/system/bin/app_process", b"\x7fELF app_process".to_vec())
        .with_remote_file(
            "/data/data/com.example.game/lib/libgame.so",
            b"\x7fELF game".to_vec(),
        );
    let device = Device::connect("emulator-5554", bridge.clone()).unwrap();
    (bridge, device)
}

#[test]
fn device_to_init_script() {
    let tmp = TempDir::new().unwrap();
    let (bridge, device) = scripted_device();

    assert_eq!(device.sdk_version(), 19);
    assert!(device.is_emulator());
    assert!(matches!(
        device.processes().refresh(None).unwrap(),
        RefreshOutcome::Refreshed { count: 3, .. }
    ));

    let pid = device.processes().ids_by_name("com.example.game")[0];
    assert_eq!(device.processes().child_ids_by_parent(pid), vec![830]);
    let process = device.processes().process_by_id(pid).unwrap();

    let mut options = SessionOptions::new(tmp.path());
    options.library_paths = vec!["/work/game/jni".into()];
    let session = SessionSetup::new(process, options).unwrap();
    let script = session.prepare().unwrap();

    let cache = session.config().cache_dir.display().to_string();
    assert_eq!(
        script,
        vec![
            "set target-async on".to_string(),
            "set breakpoint pending on".to_string(),
            "directory /work/game/jni".to_string(),
            format!("set solib-search-path {cache}:{cache}/lib"),
            format!("file {cache}/app_process"),
        ]
    );
    assert!(session.config().cache_dir.join("lib").join("libgame.so").is_file());
    assert_eq!(bridge.forwards(), vec![(5039, ForwardTarget::Tcp(5039))]);

    // A second preparation only retries what was missing.
    let before = bridge.calls().len();
    session.prepare().unwrap();
    let repulled: Vec<String> = bridge.calls()[before..]
        .iter()
        .filter_map(|c| match c {
            BridgeCall::Pull { remote, .. } => Some(remote.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(repulled, vec!["/system/lib/libc.so"]);

    session.teardown_tunnel().unwrap();
    assert_eq!(bridge.calls().last(), Some(&BridgeCall::ClearForwards));
}

#[test]
fn failing_tunnel_names_its_stage() {
    let tmp = TempDir::new().unwrap();
    let (bridge, device) = scripted_device();
    bridge.fail_forwards();
    device.processes().refresh(None).unwrap();
    let process = device.processes().process_by_id(812).unwrap();

    let session = SessionSetup::new(process, SessionOptions::new(tmp.path())).unwrap();
    let err = session.prepare().unwrap_err();
    assert!(matches!(err, SessionError::Stage { .. }));
    assert_eq!(err.stage(), Some(SetupStage::Tunnel));
    assert_eq!(bridge.pull_count(), 0);
}

/// Answers every command with `^done`, and `-stack-list-frames` with one frame.
async fn fake_gdb(stream: tokio::io::DuplexStream, seen: Arc<std::sync::Mutex<Vec<String>>>) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let digits = line.bytes().take_while(u8::is_ascii_digit).count();
        let (token, command) = line.split_at(digits);
        seen.lock().unwrap().push(command.to_string());
        let reply = if command == "-stack-list-frames" {
            format!(
                "{token}^done,stack=[frame={{level=\"0\",addr=\"0x40012a10\",\
                 func=\"game_loop\",file=\"game.c\",line=\"88\"}}]\n"
            )
        } else if command.starts_with("-target-select") {
            format!("{token}^connected\n*stopped,reason=\"signal-received\",signal-name=\"SIGTRAP\",thread-id=\"1\"\n")
        } else {
            format!("{token}^done\n(gdb) \n")
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

#[tokio::test]
async fn init_script_drives_protocol_client() {
    let tmp = TempDir::new().unwrap();
    let (_bridge, device) = scripted_device();
    device.processes().refresh(None).unwrap();
    let process = device.processes().process_by_id(812).unwrap();
    let session = SessionSetup::new(process, SessionOptions::new(tmp.path())).unwrap();
    let script = session.prepare().unwrap();

    let (near, far) = tokio::io::duplex(64 * 1024);
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    tokio::spawn(fake_gdb(far, seen.clone()));
    let (reader, writer) = tokio::io::split(near);
    let client = Arc::new(ProtocolClient::connect(reader, writer, ClientOptions::default()));

    client.run_init_script(&script).await.unwrap();
    assert_eq!(client.state(), ClientState::Ready);

    client
        .target_remote(&session.config().endpoint())
        .await
        .unwrap();
    let mut state = client.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ClientState::Stopped),
    )
    .await
    .unwrap()
    .unwrap();

    let stacks = ThreadStackCache::attach(client.clone());
    let frames = stacks.get_frames(1).await.unwrap();
    assert_eq!(frames[0].func.as_deref(), Some("game_loop"));
    assert_eq!(frames[0].line, Some(88));

    let commands = seen.lock().unwrap().clone();
    assert_eq!(&commands[..script.len()], script.as_slice());
    assert_eq!(
        &commands[script.len()..],
        [
            "-target-select remote localhost:5039",
            "-thread-select 1",
            "-stack-list-frames"
        ]
    );

    client.kill();
    assert_eq!(client.state(), ClientState::Disconnected);
}
