use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn uap_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("uap");
    path
}

const SAMPLE_CSV: &str = "\u{FEFF}#,Fundstelle,Fragesteller,Frage,Zeuge,Antwort,Anmerkung
1,WP20/3,Abg. Müller,Wann wussten Sie davon?,Dr. Schmidt,Im März.,
,,,,,,Vorsitzende: Die Sitzung wird unterbrochen.
2,WP20/4,Abg. Weber,\"Wer hat das, bitte, angeordnet?\",Dr. Schmidt,Der Staatssekretär.,
";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(root.join("sample.csv"), SAMPLE_CSV).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/uap.sqlite"

[search]
workers = 5

[llm]
provider = "disabled"
"#,
        root.display()
    );

    let config_path = config_dir.join("uap.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_uap(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = uap_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--status")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run uap binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_uap(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));

    let (_, stderr, success) = run_uap(&config, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_import_list_edit_export_reset() {
    let (tmp, config) = setup_test_env();
    let csv = tmp.path().join("sample.csv");

    let (stdout, stderr, success) = run_uap(&config, &["import", csv.to_str().unwrap()]);
    assert!(success, "import failed: {}", stderr);
    assert!(stdout.contains("3 records imported."));

    let (stdout, _, success) = run_uap(&config, &["list", "--json"]);
    assert!(success);
    let entries: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(entries.as_array().unwrap().len(), 3);
    assert_eq!(entries[1]["note"], "Vorsitzende: Die Sitzung wird unterbrochen.");
    assert_eq!(entries[2]["question"], "Wer hat das, bitte, angeordnet?");

    let (stdout, _, success) = run_uap(&config, &["list", "--text", "staatssekretär"]);
    assert!(success);
    assert!(stdout.contains("1 of 3 records"));

    let (stdout, stderr, success) = run_uap(
        &config,
        &["edit", "2", "--set", "note=", "--set", "answer=Nachtrag"],
    );
    assert!(success, "edit failed: {}", stderr);
    assert!(stdout.contains("Record #2 updated."));

    let (_, stderr, success) = run_uap(&config, &["edit", "2", "--set", "id=9"]);
    assert!(!success);
    assert!(stderr.contains("cannot be edited"));

    let xlsx = tmp.path().join("out.xlsx");
    let (_, stderr, success) = run_uap(
        &config,
        &["export", "--format", "xlsx", "--output", xlsx.to_str().unwrap()],
    );
    assert!(success, "export failed: {}", stderr);
    assert!(fs::read(&xlsx).unwrap().starts_with(b"PK"));

    let csv_out = tmp.path().join("out.csv");
    let (_, _, success) = run_uap(&config, &["export", "--output", csv_out.to_str().unwrap()]);
    assert!(success);
    let exported = fs::read_to_string(&csv_out).unwrap();
    assert!(exported.contains("\"Wer hat das, bitte, angeordnet?\""));
    assert!(exported.contains("Nachtrag"));

    let (_, _, success) = run_uap(&config, &["reset"]);
    assert!(success);
    let (stdout, _, _) = run_uap(&config, &["list"]);
    assert!(stdout.contains("0 of 0 records"));
}

#[test]
fn test_search_without_provider_fails() {
    let (tmp, config) = setup_test_env();
    let csv = tmp.path().join("sample.csv");
    let (_, stderr, success) = run_uap(
        &config,
        &["search", "Weisung", "--csv", csv.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("kein Sprachmodell konfiguriert"));
}

#[test]
fn test_rejects_invalid_config() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[db]\npath = \"x.sqlite\"\n[parsing]\nchunk_size = 0\n").unwrap();
    let (_, stderr, success) = run_uap(&bad, &["list"]);
    assert!(!success);
    assert!(stderr.contains("chunk_size"));
}
