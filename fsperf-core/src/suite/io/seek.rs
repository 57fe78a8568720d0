// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Seek semantics: a fixed table of edge cases followed by random seeks,
//! replayed twice (the second time reading 2KB at each position).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use rand::Rng;

use super::{check_pattern, rand_between, IoFile, KIB};
use crate::pattern::DEFAULT_FILLER;
use crate::suite::TestContext;

const RANDOM_SEEKS: usize = 64;
const CHECK_READ: usize = 2 * KIB as usize;

/// One seek and its expected outcome; `None` expects `EINVAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekCase {
    pub from: SeekFrom,
    pub expected: Option<u64>,
}

const fn ok(from: SeekFrom, expected: u64) -> SeekCase {
    SeekCase {
        from,
        expected: Some(expected),
    }
}

/// The fixed cases for a file of `size` bytes, then `RANDOM_SEEKS` random
/// ones within `0..=size + size / 8`.
pub fn seek_cases(size: u64, rng: &mut impl Rng) -> Vec<SeekCase> {
    let signed = size as i64;
    let mut cases = vec![
        ok(SeekFrom::Start(0), 0),
        ok(SeekFrom::Current(0), 0),
        ok(SeekFrom::End(0), size),
        ok(SeekFrom::Current(-4096), size - 4096),
        ok(SeekFrom::Current(4096 - signed), 0),
        ok(SeekFrom::End(-signed / 2), size - size / 2),
        ok(SeekFrom::Current(-signed / 2), 0),
        SeekCase {
            from: SeekFrom::Current(-1),
            expected: None,
        },
        ok(SeekFrom::Current(0), 0),
    ];

    let mut position = 0u64;
    for _ in 0..RANDOM_SEEKS {
        let case = match rng.gen_range(0..3) {
            0 => {
                let target = rand_between(rng, 0, size + size / 8);
                ok(SeekFrom::Start(target), target)
            }
            1 => {
                let target = rand_between(rng, 0, size + size / 8);
                ok(SeekFrom::Current(target as i64 - position as i64), target)
            }
            _ => {
                let back = rand_between(rng, 0, size);
                ok(SeekFrom::End(-(back as i64)), size - back)
            }
        };
        if let Some(target) = case.expected {
            position = target;
        }
        cases.push(case);
    }
    cases
}

/// Replay `cases`, returning the problems found.
fn replay(file: &mut File, size: u64, cases: &[SeekCase], read_check: bool) -> io::Result<Vec<String>> {
    let mut problems = Vec::new();
    let mut buf = [0u8; CHECK_READ];

    for (i, case) in cases.iter().enumerate() {
        match (file.seek(case.from), case.expected) {
            (Ok(actual), Some(expected)) => {
                if actual != expected {
                    problems.push(format!("seek #{} {:?}: at {}, expected {}", i, case.from, actual, expected));
                }
                let tell = file.stream_position()?;
                if tell != actual {
                    problems.push(format!("seek #{}: position {} but tell says {}", i, actual, tell));
                }
                if read_check && actual + CHECK_READ as u64 <= size {
                    file.read_exact(&mut buf)?;
                    let report = crate::pattern::PatternBuffer::verify(actual, &buf, DEFAULT_FILLER);
                    if let Some(first) = report.first() {
                        problems.push(format!("seek #{}: read after seek: {}", i, first));
                    }
                    file.seek(SeekFrom::Current(-(CHECK_READ as i64)))?;
                }
            }
            (Ok(actual), None) => {
                problems.push(format!("seek #{} {:?}: landed at {}, expected EINVAL", i, case.from, actual));
            }
            (Err(e), Some(_)) => problems.push(format!("seek #{} {:?}: {}", i, case.from, e)),
            (Err(e), None) if e.raw_os_error() == Some(libc::EINVAL) => {}
            (Err(e), None) => problems.push(format!("seek #{} {:?}: {}, expected EINVAL", i, case.from, e)),
        }
    }
    Ok(problems)
}

pub fn run(ctx: &mut TestContext, io: &mut IoFile) {
    ctx.report.sub("seek");

    let cases = seek_cases(io.size, &mut rand::thread_rng());
    for read_check in [false, true] {
        match replay(&mut io.file, io.size, &cases, read_check) {
            Ok(problems) => problems.into_iter().for_each(|p| ctx.report.failed(p)),
            Err(e) => ctx.report.failed(format_args!("seek replay: {}", e)),
        }
    }

    let size = io.size;
    let file = &mut io.file;
    let m = ctx.profiler.profile("seek/start", |i| {
        file.seek(SeekFrom::Start(i % size)).map(drop)
    });
    ctx.report.profiled(m);
    let m = ctx.profiler.profile("seek/end", |i| {
        file.seek(SeekFrom::End(-((i % size) as i64))).map(drop)
    });
    ctx.report.profiled(m);

    // Reads in later areas start from the beginning.
    let mut first = [0u8; 16];
    let reread = io
        .file
        .seek(SeekFrom::Start(0))
        .and_then(|_| io.file.read_exact(&mut first));
    if ctx.report.check_ok(reread, "re-reading start").is_some() {
        check_pattern(&mut ctx.report, "start after seeks", 0, &first, DEFAULT_FILLER);
    }
    ctx.report.check_ok(io.file.seek(SeekFrom::Start(0)), "seek to start");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternBuffer;
    use crate::suite::create_replace;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_cases_track_position() {
        let mut rng = rand::thread_rng();
        let size = 1 << 20;
        let cases = seek_cases(size, &mut rng);
        assert_eq!(cases.len(), 9 + RANDOM_SEEKS);
        assert_eq!(cases[5].expected, Some(size / 2));
        assert_eq!(cases[7].expected, None);
        for case in &cases {
            if let Some(expected) = case.expected {
                assert!(expected <= size + size / 8);
            }
        }
    }

    #[test]
    fn test_replay_on_pattern_file() {
        let temp = TempDir::new().unwrap();
        let size = 64 * KIB;
        let mut file = create_replace(&temp.path().join("f")).unwrap();
        let mut content = vec![0u8; size as usize];
        PatternBuffer::fill(0, &mut content, DEFAULT_FILLER);
        file.write_all(&content).unwrap();

        let cases = seek_cases(size, &mut rand::thread_rng());
        let problems = replay(&mut file, size, &cases, true).unwrap();
        assert!(problems.is_empty(), "{:?}", problems);
    }
}
