//! `burrow init`

use std::{fs, io::Write};

use anyhow::{Context as _, Result};
use burrow_core::config::{root_config_path, LockConfig, StoreConfig};
use serde::Serialize;

use super::Context;
use crate::output::emit;

/// Tunables written to a fresh `config.toml`; the root is implied by location.
#[derive(Serialize)]
struct RootConfigFile<'a> {
    lock: &'a LockConfig,
    store: &'a StoreConfig,
}

#[derive(Serialize)]
struct InitOutput {
    root: String,
    config_created: bool,
}

pub fn handle_init(ctx: &Context) -> Result<i32> {
    let config = ctx.burrow.config();
    let path = root_config_path(ctx.burrow.root());

    let contents = toml::to_string_pretty(&RootConfigFile {
        lock: &config.lock,
        store: &config.store,
    })?;
    let config_created = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(mut file) => {
            file.write_all(contents.as_bytes())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => false,
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to create {}", path.display()));
        }
    };

    let output = InitOutput {
        root: ctx.burrow.root().display().to_string(),
        config_created,
    };
    emit(ctx.json, &output, |o| {
        if o.config_created {
            format!("Initialized coordination root at {}", o.root)
        } else {
            format!("Coordination root at {} already initialized", o.root)
        }
    })?;
    Ok(0)
}
