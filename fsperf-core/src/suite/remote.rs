// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Cross-client coherency. A slave on another host (or another mount of the
//! same share) changes `file30` through its own handle while this side
//! watches sizes and content through a local one.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};

use super::TestContext;
use crate::comms::CommsMaster;
use crate::report::TestReport;

const FILE: &str = "file30";

/// Run `script` on the slave; false (with a recorded failure) unless it
/// succeeded.
fn remote(report: &mut TestReport, master: &mut CommsMaster, script: &str) -> bool {
    match master.send_script(script) {
        Ok(outcome) if outcome.is_success() => true,
        Ok(outcome) => {
            report.failed(format_args!(
                "remote script {:?} failed with {}: {}",
                script, outcome.status, outcome.message
            ));
            false
        }
        Err(e) => {
            report.failed(format_args!("sending remote script {:?}: {}", script, e));
            false
        }
    }
}

/// Read exactly `len` bytes from the current position and check they are
/// all `byte`.
fn expect_bytes(file: &mut File, len: usize, byte: u8) -> io::Result<Option<String>> {
    let mut buf = vec![!byte; len];
    file.read_exact(&mut buf)?;
    Ok(buf
        .iter()
        .position(|&b| b != byte)
        .map(|pos| format!("expected {:#04x} at +{}, found {:#04x}", byte, pos, buf[pos])))
}

/// A read at the current position must return nothing.
fn expect_eof(file: &mut File) -> io::Result<Option<String>> {
    let mut buf = [0u8; 64];
    let read = file.read(&mut buf)?;
    Ok((read != 0).then(|| format!("read {} bytes where end of file was expected", read)))
}

fn expect_size(file: &File, size: u64) -> io::Result<Option<String>> {
    let actual = file.metadata()?.len();
    Ok((actual != size).then(|| format!("file size {}, expected {}", actual, size)))
}

/// Replace the whole local content with `len` bytes of `byte` and cut the
/// file to `size`.
fn local_fill(file: &mut File, len: usize, byte: u8, size: u64) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    file.write_all(&vec![byte; len])?;
    file.set_len(size)?;
    Ok(())
}

/// Record the outcome of one local step. Returns false when the scenario
/// cannot continue.
fn step(report: &mut TestReport, what: &str, result: io::Result<Option<String>>) -> bool {
    match result {
        Ok(None) => true,
        Ok(Some(problem)) => {
            report.failed(format_args!("{}: {}", what, problem));
            true
        }
        Err(e) => {
            report.failed(format_args!("{}: {}", what, e));
            false
        }
    }
}

macro_rules! try_step {
    ($report:expr, $what:expr, $result:expr) => {
        if !step($report, $what, $result) {
            return;
        }
    };
}

fn scenarios(report: &mut TestReport, master: &mut CommsMaster, open: impl Fn() -> io::Result<File>) {
    // A: remote create with pattern 0 is visible locally.
    if !remote(report, master, "reset\nopen 0 'file30' 'w' 'ca'\nwritepattern 0 0 0 4096") {
        return;
    }
    let mut file = match open() {
        Ok(file) => file,
        Err(e) => {
            report.failed(format_args!("opening {} locally: {}", FILE, e));
            return;
        }
    };
    try_step!(report, "remote create", expect_bytes(&mut file, 4096, 0xf0));
    try_step!(report, "remote create end", expect_eof(&mut file));

    // Remote append is readable from the old position.
    if remote(report, master, "writepattern 0 4096 1 1024") {
        try_step!(report, "remote append", expect_bytes(&mut file, 1024, 0xf1));
        try_step!(report, "remote append end", expect_eof(&mut file));
    }

    // B: remote truncate.
    if remote(report, master, "truncate 0 1024") {
        try_step!(report, "remote truncate end", expect_eof(&mut file));
        try_step!(report, "rewind", file.seek(SeekFrom::Start(0)).map(|_| None));
        try_step!(report, "remote truncate", expect_bytes(&mut file, 1024, 0xf0));
        try_step!(report, "remote truncate end", expect_eof(&mut file));
    }

    // C: local truncate after a remote extension wins.
    try_step!(report, "local write", local_fill(&mut file, 16384, 0xe9, 8000).map(|_| None));
    if remote(report, master, "writepattern 0 8000 0 1000") {
        try_step!(report, "local truncate", file.set_len(8000).map(|_| None));
        try_step!(report, "local truncate after remote extend", expect_size(&file, 8000));
        try_step!(report, "position", file.seek(SeekFrom::Start(8000)).map(|_| None));
        try_step!(report, "local truncate end", expect_eof(&mut file));
    }

    try_step!(report, "local write", local_fill(&mut file, 5000, 0xe8, 5000).map(|_| None));
    if remote(report, master, "writepattern 0 5000 0 1000") {
        try_step!(report, "local truncate", file.set_len(5000).map(|_| None));
        try_step!(report, "local truncate end", expect_eof(&mut file));
        try_step!(report, "local truncate size", expect_size(&file, 5000));
    }

    // Remote truncate below the local size.
    try_step!(report, "local write", local_fill(&mut file, 16384, 0xe9, 10000).map(|_| None));
    if remote(report, master, "truncate 0 4000") {
        try_step!(report, "remote truncate size", expect_size(&file, 4000));
        try_step!(report, "position", file.seek(SeekFrom::Start(4000)).map(|_| None));
        try_step!(report, "remote truncate end", expect_eof(&mut file));
    }

    // A fresh handle sees a remote extension.
    try_step!(report, "local write", local_fill(&mut file, 12288, 0xe7, 12288).map(|_| None));
    try_step!(report, "flush", file.sync_all().map(|_| None));
    if remote(report, master, "writepattern 0 12288 2 4096") {
        drop(file);
        file = match open() {
            Ok(file) => file,
            Err(e) => {
                report.failed(format_args!("reopening {}: {}", FILE, e));
                return;
            }
        };
        try_step!(report, "reopen after remote extend", expect_bytes(&mut file, 12288, 0xe7));
        try_step!(report, "remote extension", expect_bytes(&mut file, 4096, 0xf2));
        try_step!(report, "remote extension end", expect_eof(&mut file));
    }

    // A fresh handle sees a remote truncate.
    try_step!(report, "local write", local_fill(&mut file, 12288, 0xe6, 12288).map(|_| None));
    try_step!(report, "flush", file.sync_all().map(|_| None));
    if remote(report, master, "truncate 0 7500") {
        drop(file);
        file = match open() {
            Ok(file) => file,
            Err(e) => {
                report.failed(format_args!("reopening {}: {}", FILE, e));
                return;
            }
        };
        try_step!(report, "reopen after remote truncate", expect_bytes(&mut file, 7500, 0xe6));
        try_step!(report, "reopen after remote truncate end", expect_eof(&mut file));
    }
}

pub fn run(ctx: &mut TestContext) {
    ctx.report.sub("remote");

    let Some(mut master) = ctx.master.take() else {
        ctx.report.skipped("no comms directory");
        return;
    };

    let dirs = ctx.dirs.clone();
    let open = || OpenOptions::new().read(true).write(true).open(dirs.path(FILE));
    scenarios(&mut ctx.report, &mut master, open);
    remote(&mut ctx.report, &mut master, "reset");

    ctx.report.check_ok(
        std::fs::remove_file(ctx.dirs.path(FILE)),
        format_args!("deleting {}", FILE),
    );
    ctx.master = Some(master);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::create_replace;
    use tempfile::TempDir;

    #[test]
    fn test_local_checks() {
        let temp = TempDir::new().unwrap();
        let mut file = create_replace(&temp.path().join("f")).unwrap();

        local_fill(&mut file, 16384, 0xe9, 8000).unwrap();
        assert_eq!(expect_size(&file, 8000).unwrap(), None);
        assert!(expect_size(&file, 16384).unwrap().is_some());

        file.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(expect_bytes(&mut file, 8000, 0xe9).unwrap(), None);
        assert_eq!(expect_eof(&mut file).unwrap(), None);

        file.seek(SeekFrom::Start(0)).unwrap();
        assert!(expect_bytes(&mut file, 100, 0xf0).unwrap().is_some());
        assert!(expect_eof(&mut file).unwrap().is_some());
    }
}
