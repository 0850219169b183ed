// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write as _;

use clap::Parser;

use super::*;

fn parse(args: &[&str]) -> Config {
    let mut full = vec!["doorman"];
    full.extend_from_slice(args);
    Config::parse_from(full)
}

#[test]
fn defaults_are_valid() {
    let config = parse(&[]);
    assert!(config.validate().is_ok());
    assert_eq!(config.log_level, "info");
    assert_eq!(config.log_format, "text");
    assert!(!config.test_mode);
}

#[test]
fn bad_log_format_is_rejected() {
    let config = parse(&["--log-format", "xml"]);
    assert!(config.validate().is_err());
}

#[test]
fn empty_greeter_session_is_rejected() {
    let config = parse(&["--greeter-session", " "]);
    assert!(config.validate().is_err());
}

#[test]
fn without_a_file_one_local_seat_is_defined() -> anyhow::Result<()> {
    let config = parse(&[]);
    let seats = config.load_seats()?;
    assert_eq!(seats.len(), 1);
    assert_eq!(seats[0].name.as_deref(), Some("seat0"));
    assert_eq!(seats[0].kind, "local");
    assert!(seats[0].properties.is_empty());
    Ok(())
}

#[test]
fn seat_file_is_parsed() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"[
            {{"name": "seat0", "properties": {{"autologin-user": "alice"}}}},
            {{"name": "kiosk", "type": "static", "properties": {{"exit-on-failure": "true"}}}}
        ]"#
    )?;
    let config = parse(&["--config", &file.path().to_string_lossy()]);
    let seats = config.load_seats()?;
    assert_eq!(seats.len(), 2);
    assert_eq!(seats[0].kind, "local");
    assert_eq!(seats[0].properties.get("autologin-user").map(String::as_str), Some("alice"));
    assert_eq!(seats[1].kind, "static");
    assert_eq!(seats[1].name.as_deref(), Some("kiosk"));
    Ok(())
}

#[test]
fn empty_seat_file_is_rejected() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, "[]")?;
    let config = parse(&["--config", &file.path().to_string_lossy()]);
    assert!(config.load_seats().is_err());
    Ok(())
}

#[test]
fn malformed_seat_file_is_rejected() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, "{{ not json")?;
    let config = parse(&["--config", &file.path().to_string_lossy()]);
    assert!(config.load_seats().is_err());
    Ok(())
}

#[test]
fn missing_seat_file_is_an_error() {
    let config = parse(&["--config", "/nonexistent/seats.json"]);
    assert!(config.load_seats().is_err());
}
