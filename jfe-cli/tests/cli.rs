use predicates::prelude::*;
use serde_json::Value;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const KEY: &str = "QkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkI=";
const DOCUMENT: &str = r#"{"id":"1","ssn":"123-45-6789","tags":["a","b"]}"#;

struct Workspace {
    dir: TempDir,
    input: PathBuf,
}

impl Workspace {
    fn new() -> Result<Self, Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.json");
        fs::write(&input, DOCUMENT)?;
        Ok(Self { dir, input })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn jfe() -> Result<assert_cmd::Command, Box<dyn Error>> {
    let mut cmd = assert_cmd::Command::cargo_bin("jfe")?;
    cmd.env_remove("JFE_KEY").env_remove("JFE_LOG");
    Ok(cmd)
}

fn encrypt_sample(ws: &Workspace) -> Result<PathBuf, Box<dyn Error>> {
    let encrypted = ws.path("encrypted.json");
    jfe()?
        .args([
            "encrypt",
            ws.input.to_str().unwrap(),
            "-o",
            encrypted.to_str().unwrap(),
            "--path",
            "/ssn",
            "--key-id",
            "dek-1",
            "--key",
            KEY,
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("properties: 1"));
    Ok(encrypted)
}

#[test]
fn encrypt_and_decrypt_round_trip() -> Result<(), Box<dyn Error>> {
    let ws = Workspace::new()?;
    let encrypted = encrypt_sample(&ws)?;

    let value: Value = serde_json::from_slice(&fs::read(&encrypted)?)?;
    assert_ne!(value["ssn"], "123-45-6789");
    assert_eq!(value["_ei"]["_en"], "dek-1");
    assert_eq!(value["_ei"]["_ep"][0], "/ssn");

    let output = jfe()?
        .args(["decrypt", encrypted.to_str().unwrap(), "--key", KEY])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(String::from_utf8(output)?, DOCUMENT);
    Ok(())
}

#[test]
fn key_from_environment_and_tree_strategy() -> Result<(), Box<dyn Error>> {
    let ws = Workspace::new()?;
    let encrypted = encrypt_sample(&ws)?;
    let decrypted = ws.path("decrypted.json");

    jfe()?
        .env("JFE_KEY", KEY)
        .args([
            "decrypt",
            encrypted.to_str().unwrap(),
            "-o",
            decrypted.to_str().unwrap(),
            "--strategy",
            "tree",
            "--context",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains(r#""decrypted_paths":["/ssn"]"#));

    assert_eq!(fs::read_to_string(&decrypted)?, DOCUMENT);
    Ok(())
}

#[test]
fn config_file_supplies_options() -> Result<(), Box<dyn Error>> {
    let ws = Workspace::new()?;
    let config = ws.path("jfe.toml");
    fs::write(
        &config,
        format!(
            "key_id = \"dek-9\"\nkey = \"{}\"\npaths = [\"/ssn\", \"/tags\"]\n\n[compression]\nalgorithm = \"brotli\"\nlevel = 5\nmin_length = 1\n",
            KEY
        ),
    )?;
    let encrypted = ws.path("encrypted.json");

    jfe()?
        .args([
            "encrypt",
            ws.input.to_str().unwrap(),
            "-o",
            encrypted.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
        ])
        .assert()
        .success();

    let value: Value = serde_json::from_slice(&fs::read(&encrypted)?)?;
    assert_eq!(value["_ei"]["_en"], "dek-9");
    assert_eq!(value["_ei"]["_ep"].as_array().unwrap().len(), 2);
    assert_eq!(value["_ei"]["_ce"], 1);

    jfe()?
        .args([
            "decrypt",
            encrypted.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(DOCUMENT);
    Ok(())
}

#[test]
fn inspect_reports_metadata() -> Result<(), Box<dyn Error>> {
    let ws = Workspace::new()?;
    let encrypted = encrypt_sample(&ws)?;

    jfe()?
        .args(["inspect", encrypted.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Key id:          dek-1"))
        .stdout(predicate::str::contains("/ssn"));

    let output = jfe()?
        .args(["inspect", encrypted.to_str().unwrap(), "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: Value = serde_json::from_slice(&output)?;
    assert_eq!(value["_ef"], 3);
    assert_eq!(value["_ea"], "AEAD_AES_256_GCM_RANDOMIZED");

    jfe()?
        .args(["inspect", ws.input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("No encryption metadata"));
    Ok(())
}

#[test]
fn keygen_output_is_usable() -> Result<(), Box<dyn Error>> {
    let ws = Workspace::new()?;
    let key_file = ws.path("dek.key");
    jfe()?
        .args(["keygen", "-o", key_file.to_str().unwrap()])
        .assert()
        .success();
    let key = fs::read_to_string(&key_file)?.trim().to_string();
    assert_eq!(key.len(), 44);

    let encrypted = ws.path("encrypted.json");
    jfe()?
        .args([
            "encrypt",
            ws.input.to_str().unwrap(),
            "-o",
            encrypted.to_str().unwrap(),
            "-p",
            "/ssn",
            "--key-id",
            "fresh",
            "--key",
            &key,
        ])
        .assert()
        .success();
    jfe()?
        .args(["decrypt", encrypted.to_str().unwrap(), "--key", &key])
        .assert()
        .success()
        .stdout(DOCUMENT);
    Ok(())
}

#[test]
fn wrong_key_fails_and_leaves_no_output() -> Result<(), Box<dyn Error>> {
    let ws = Workspace::new()?;
    let encrypted = encrypt_sample(&ws)?;
    let decrypted = ws.path("decrypted.json");
    let other_key = "QUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUE=";

    jfe()?
        .args([
            "decrypt",
            encrypted.to_str().unwrap(),
            "-o",
            decrypted.to_str().unwrap(),
            "--key",
            other_key,
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Decryption failed"));
    assert!(!decrypted.exists());
    Ok(())
}

#[test]
fn usage_errors_exit_with_two() -> Result<(), Box<dyn Error>> {
    let ws = Workspace::new()?;

    jfe()?
        .args(["encrypt", ws.input.to_str().unwrap(), "--path", "/ssn", "--key-id", "k"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no key supplied"));

    jfe()?
        .args([
            "encrypt",
            ws.input.to_str().unwrap(),
            "--path",
            "/id",
            "--key-id",
            "k",
            "--key",
            KEY,
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid configuration"));
    Ok(())
}

#[test]
fn stdin_to_stdout() -> Result<(), Box<dyn Error>> {
    let output = jfe()?
        .args(["encrypt", "-", "--path", "/ssn", "--key-id", "k", "--key", KEY])
        .write_stdin(DOCUMENT)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    jfe()?
        .args(["decrypt", "-", "--key", KEY])
        .write_stdin(output)
        .assert()
        .success()
        .stdout(DOCUMENT);
    Ok(())
}
