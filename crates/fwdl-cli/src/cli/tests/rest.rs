//! Tests for status, resume, remove, purge, checksum.

use std::path::PathBuf;

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;

#[test]
fn cli_parse_status() {
    match parse(&["fwdl", "status"]) {
        CliCommand::Status => {}
        _ => panic!("expected Status"),
    }
}

#[test]
fn cli_parse_resume_all() {
    match parse(&["fwdl", "resume"]) {
        CliCommand::Resume { id } => assert!(id.is_none()),
        _ => panic!("expected Resume"),
    }
}

#[test]
fn cli_parse_resume_one() {
    match parse(&["fwdl", "resume", "3f2a9c01d4e5b6a7"]) {
        CliCommand::Resume { id } => assert_eq!(id.as_deref(), Some("3f2a9c01d4e5b6a7")),
        _ => panic!("expected Resume"),
    }
}

#[test]
fn cli_parse_remove() {
    match parse(&["fwdl", "remove", "radio"]) {
        CliCommand::Remove { id, delete_files } => {
            assert_eq!(id, "radio");
            assert!(!delete_files);
        }
        _ => panic!("expected Remove"),
    }
}

#[test]
fn cli_parse_remove_delete_files() {
    match parse(&["fwdl", "remove", "radio", "--delete-files"]) {
        CliCommand::Remove { id, delete_files } => {
            assert_eq!(id, "radio");
            assert!(delete_files);
        }
        _ => panic!("expected Remove with --delete-files"),
    }
}

#[test]
fn cli_parse_purge() {
    match parse(&["fwdl", "purge"]) {
        CliCommand::Purge { older_than_days } => assert_eq!(older_than_days, 30),
        _ => panic!("expected Purge"),
    }
    match parse(&["fwdl", "purge", "--older-than-days", "7"]) {
        CliCommand::Purge { older_than_days } => assert_eq!(older_than_days, 7),
        _ => panic!("expected Purge"),
    }
}

#[test]
fn cli_parse_checksum() {
    match parse(&["fwdl", "checksum", "/tmp/file.iso"]) {
        CliCommand::Checksum { path } => assert_eq!(path, PathBuf::from("/tmp/file.iso")),
        _ => panic!("expected Checksum"),
    }
}

#[test]
fn cli_rejects_unknown_command() {
    assert!(Cli::try_parse_from(["fwdl", "bench", "https://example.com"]).is_err());
}
