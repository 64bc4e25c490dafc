use docent_core::{Database, DurableStore, EventType};
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
    xdg_runtime: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");
        let xdg_runtime = base.join("xdg-runtime");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");
        fs::create_dir_all(&xdg_runtime).expect("failed to create XDG_RUNTIME_DIR");

        seed_offline_config(&xdg_config);

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
            xdg_runtime,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("docent/docent.db")
    }
}

/// Point the client at a closed local port so every request fails fast
fn seed_offline_config(xdg_config: &std::path::Path) {
    let dir = xdg_config.join("docent");
    fs::create_dir_all(&dir).expect("failed to create config dir");
    fs::write(
        dir.join("config.toml"),
        r#"
[logging]
level = "debug"

[sync]
server_url = "http://127.0.0.1:9"
timeout_secs = 2
"#,
    )
    .expect("failed to write config");
}

fn run_docent(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("docent"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env("XDG_RUNTIME_DIR", &env.xdg_runtime)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute docent: {e}"))
}

fn assert_success(args: &[&str], output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return stdout;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "docent {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn docent_ok(env: &CliTestEnv, args: &[&str]) -> String {
    let output = run_docent(env, args);
    assert_success(args, &output)
}

#[test]
fn nothing_is_recorded_before_consent() {
    let env = CliTestEnv::new();

    let stdout = docent_ok(&env, &["record", "scan"]);
    assert!(
        stdout.contains("Consent not granted; scan not recorded"),
        "unexpected output:\n{stdout}"
    );

    let status = docent_ok(&env, &["status"]);
    assert!(status.contains("Consent:         unset"));
    assert!(status.contains("Pending events:  0"));
    assert!(status.contains("Session ID:      <not issued>"));
}

#[test]
fn offline_events_stay_queued_across_runs() {
    let env = CliTestEnv::new();

    let consent = docent_ok(&env, &["consent", "grant"]);
    assert!(consent.contains("Consent: granted (was unset)"));
    assert!(consent.contains("Queued page_open (seq 1)"));
    assert!(
        consent.contains("Kept 1 event(s) for retry (single endpoint)"),
        "expected offline retention, got:\n{consent}"
    );

    docent_ok(&env, &["record", "scan"]);
    let tour = docent_ok(&env, &["record", "add_to_tour", "--artwork", "A07"]);
    assert!(tour.contains("Queued add_to_tour for A07"));
    assert!(tour.contains("Kept 3 event(s) for retry (batch endpoint)"));

    let queue = docent_ok(&env, &["queue"]);
    assert!(queue.contains("3 pending event(s):"));
    assert!(queue.contains("add_to_tour"));

    let flush = docent_ok(&env, &["flush"]);
    assert!(flush.contains("Kept 3 event(s) for retry"));

    let db = Database::open(&env.db_path()).expect("failed to open db");
    db.migrate().expect("failed to migrate db");

    let pending = db.pending_events().expect("failed to read queue");
    let types: Vec<_> = pending.iter().map(|q| q.event.event_type).collect();
    assert_eq!(
        types,
        vec![EventType::PageOpen, EventType::Scan, EventType::AddToTour]
    );

    let session_id = db
        .session_id()
        .expect("failed to read session id")
        .expect("session id should be issued");
    assert!(pending.iter().all(|q| q.event.session_id == session_id));
    assert_eq!(db.tour_ids().unwrap(), vec!["A07".to_string()]);
}

#[test]
fn denied_consent_drops_events() {
    let env = CliTestEnv::new();

    let consent = docent_ok(&env, &["consent", "deny"]);
    assert!(consent.contains("Consent: denied (was unset)"));

    docent_ok(&env, &["record", "play_audio", "--artwork", "A03"]);
    let status = docent_ok(&env, &["status"]);
    assert!(status.contains("Consent:         denied"));
    assert!(status.contains("Pending events:  0"));
}

#[test]
fn view_duration_requires_artwork_and_duration() {
    let env = CliTestEnv::new();
    docent_ok(&env, &["consent", "grant"]);

    let missing = run_docent(&env, &["record", "result_view_duration", "--artwork", "A07"]);
    assert!(!missing.status.success());

    let misplaced = run_docent(&env, &["record", "scan", "--duration", "5"]);
    assert!(!misplaced.status.success());

    let ok = docent_ok(
        &env,
        &["record", "result_view_duration", "--artwork", "A07", "--duration", "37"],
    );
    assert!(ok.contains("Queued result_view_duration for A07"));

    let queue = docent_ok(&env, &["queue"]);
    assert!(queue.contains("37s"));
}

#[test]
fn uncached_asset_fails_while_offline() {
    let env = CliTestEnv::new();

    let output = run_docent(&env, &["cache", "fetch", "/images/a07.jpg"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to fetch /images/a07.jpg"),
        "unexpected stderr:\n{stderr}"
    );

    let warm = run_docent(&env, &["cache", "warm"]);
    assert!(!warm.status.success());
    let stdout = String::from_utf8_lossy(&warm.stdout);
    assert!(stdout.contains("stored 0 asset(s)"));
}
