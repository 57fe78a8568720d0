// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Flush cost, alone and after dirtying one page.

use std::io::{Seek, SeekFrom, Write};

use super::{IoFile, PAGE};
use crate::suite::TestContext;

pub fn run(ctx: &mut TestContext, io: &mut IoFile) {
    ctx.report.sub("fsync");

    ctx.report.check_ok(io.file.sync_all(), "fsync");

    let file = &mut io.file;
    let m = ctx.profiler.profile("fsync", |_| file.sync_all());
    ctx.report.profiled(m);

    if ctx.report.check_ok(file.seek(SeekFrom::Start(0)), "seek to start").is_none() {
        return;
    }
    let page = vec![0xf4u8; PAGE];
    let size = io.size;
    let mut offset = 0u64;
    let m = ctx.profiler.profile("write page + fsync", |_| {
        if offset + PAGE as u64 > size {
            file.seek(SeekFrom::Start(0))?;
            offset = 0;
        }
        file.write_all(&page)?;
        file.sync_all()?;
        offset += PAGE as u64;
        Ok(())
    });
    ctx.report.profiled(m);
}
