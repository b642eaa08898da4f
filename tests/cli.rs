use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// Command isolated from the user's config, cache and plugin directories
fn mediadl(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("mediadl").unwrap();
    cmd.current_dir(home)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_CACHE_HOME", home.join("cache"))
        .env("MEDIADL_NO_PLUGINS", "1")
        .env_remove("MEDIADL_CONFIG")
        .env_remove("MEDIADL_NO_LAZY_HANDLERS")
        .env_remove("RUST_LOG");
    cmd
}

fn write_demo_plugin(home: &Path) {
    let dir = home.join("config").join("mediadl").join("plugins").join("demo");
    fs_err::create_dir_all(&dir).unwrap();
    fs_err::write(
        dir.join("plugin.yaml"),
        r#"name: demo
handlers:
  - name: Demo
    patterns: ['^https://demo\.example/v/(?P<id>\w+)']
    redirect: 'https://cdn.demo.example/{id}.mp4'
"#,
    )
    .unwrap();
}

#[test]
fn handlers_lists_builtins_with_generic_last() {
    let home = TempDir::new().unwrap();
    mediadl(home.path())
        .arg("handlers")
        .assert()
        .success()
        .stdout("Direct\nPlaylistFile\nOEmbed\nGeneric\n");
}

#[test]
fn plugin_handlers_come_first() {
    let home = TempDir::new().unwrap();
    write_demo_plugin(home.path());

    mediadl(home.path())
        .env_remove("MEDIADL_NO_PLUGINS")
        .args(["handlers", "--verbose"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Demo (plugin demo)\n"))
        .stdout(predicate::str::ends_with("Generic (built-in)\n    ^https?://\n"));
}

#[test]
fn flat_extract_returns_plugin_redirect() {
    let home = TempDir::new().unwrap();
    write_demo_plugin(home.path());

    mediadl(home.path())
        .env_remove("MEDIADL_NO_PLUGINS")
        .args(["--no-cache-dir", "extract", "--flat", "-f", "json", "https://demo.example/v/abc"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""_type": "url""#))
        .stdout(predicate::str::contains("https://cdn.demo.example/abc.mp4"));
}

#[test]
fn extract_rejects_invalid_urls() {
    let home = TempDir::new().unwrap();
    mediadl(home.path())
        .args(["extract", "not a url"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid URL format"));
}

#[test]
fn index_build_enables_lazy_handlers() {
    let home = TempDir::new().unwrap();
    let index = home.path().join("handlers.index.json");

    mediadl(home.path())
        .args(["index", "build", "--output"])
        .arg(&index)
        .assert()
        .success()
        .stdout(predicate::str::contains("Handler index with 4 entries"));
    assert!(index.is_file());

    let config = home.path().join("mediadl.yaml");
    fs_err::write(&config, format!("registry:\n  lazy_index: '{}'\n", index.display())).unwrap();

    mediadl(home.path())
        .arg("--config")
        .arg(&config)
        .args(["handlers", "--verbose"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Direct (built-in, indexed)\n"));

    mediadl(home.path())
        .env("MEDIADL_NO_LAZY_HANDLERS", "1")
        .arg("--config")
        .arg(&config)
        .args(["handlers", "--verbose"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Direct (built-in)\n"));
}

#[test]
fn cache_dir_follows_xdg_and_flags() {
    let home = TempDir::new().unwrap();

    mediadl(home.path())
        .args(["cache", "dir"])
        .assert()
        .success()
        .stdout(format!("{}\n", home.path().join("cache").join("mediadl").display()));

    mediadl(home.path())
        .args(["--no-cache-dir", "cache", "dir"])
        .assert()
        .success()
        .stdout("Cache is disabled\n");
}

#[test]
fn cache_rm_deletes_cache_directory() {
    let home = TempDir::new().unwrap();
    let root = home.path().join("cache").join("mediadl");
    fs_err::create_dir_all(root.join("oembed")).unwrap();
    fs_err::write(root.join("oembed").join("vimeo_1.json"), "{}").unwrap();

    mediadl(home.path())
        .args(["cache", "rm"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removing cache dir"));
    assert!(!root.exists());
}

#[test]
fn cache_rm_refuses_unsafe_directory() {
    let home = TempDir::new().unwrap();

    mediadl(home.path())
        .args(["--cache-dir", "/srv/mediadl-store", "cache", "rm"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not look like a cache dir"));
}

#[test]
fn cache_rm_with_caching_disabled() {
    let home = TempDir::new().unwrap();

    mediadl(home.path())
        .args(["--no-cache-dir", "cache", "rm"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cache is disabled"));
}
