// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::plane::{ApprovalBroadcast, PlaneConfig};

/// Control plane for remote AI coding-agent terminal sessions.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "SWITCHBOARD_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP port to listen on.
    #[arg(long, env = "SWITCHBOARD_PORT", default_value = "18080")]
    pub port: u16,

    /// Bearer token presented by host agents.
    #[arg(long, env = "AGENT_TOKEN", default_value = "agent-dev-token")]
    pub agent_token: String,

    /// Bearer token presented by operator UIs.
    #[arg(long, env = "UI_TOKEN", default_value = "admin-dev-token")]
    pub ui_token: String,

    /// Append-only audit log path (JSONL).
    #[arg(long, env = "SWITCHBOARD_AUDIT_PATH", default_value = "./audit.jsonl")]
    pub audit_path: PathBuf,

    /// Per-session ring buffer size in bytes.
    #[arg(long, env = "SWITCHBOARD_RING_BYTES", default_value = "131072")]
    pub ring_buffer_bytes: usize,

    /// Mark a server offline after this many seconds without a heartbeat.
    #[arg(long, env = "SWITCHBOARD_OFFLINE_AFTER_SEC", default_value = "20")]
    pub offline_after_sec: u64,

    /// Heartbeat interval advertised to agents, in milliseconds.
    #[arg(long, env = "SWITCHBOARD_HEARTBEAT_MS", default_value = "5000")]
    pub heartbeat_interval_ms: u64,

    /// Admitted requests per rate window and key.
    #[arg(long, env = "SWITCHBOARD_RATE_LIMIT", default_value = "1200")]
    pub rate_limit: u32,

    /// Rate window in seconds.
    #[arg(long, env = "SWITCHBOARD_RATE_WINDOW_SEC", default_value = "60")]
    pub rate_window_sec: u64,

    /// Default stop grace period in milliseconds.
    #[arg(long, env = "SWITCHBOARD_DEFAULT_GRACE_MS", default_value = "4000")]
    pub default_grace_ms: i64,

    /// Default stop-to-kill delay in milliseconds.
    #[arg(long, env = "SWITCHBOARD_DEFAULT_KILL_MS", default_value = "9000")]
    pub default_kill_ms: i64,

    /// Who receives approval events: "all" subscribers or only "attached".
    #[arg(long, env = "SWITCHBOARD_APPROVAL_BROADCAST", default_value = "all")]
    pub approval_broadcast: String,

    /// Heuristic prompt detection emitting approval_needed events.
    #[arg(
        long,
        env = "SWITCHBOARD_PROMPT_DETECTION",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub prompt_detection: bool,

    /// Log format (json or text).
    #[arg(long, env = "SWITCHBOARD_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "SWITCHBOARD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.approval_broadcast_enum()?;
        if self.agent_token.is_empty() || self.ui_token.is_empty() {
            anyhow::bail!("agent and ui tokens must not be empty");
        }
        if self.ring_buffer_bytes == 0 {
            anyhow::bail!("--ring-buffer-bytes must be positive");
        }
        Ok(())
    }

    /// Parse the approval broadcast policy string.
    pub fn approval_broadcast_enum(&self) -> anyhow::Result<ApprovalBroadcast> {
        match self.approval_broadcast.to_lowercase().as_str() {
            "all" => Ok(ApprovalBroadcast::All),
            "attached" => Ok(ApprovalBroadcast::Attached),
            other => anyhow::bail!("invalid approval broadcast policy: {other}"),
        }
    }

    /// Build the control-plane config from the CLI surface.
    pub fn plane_config(&self) -> anyhow::Result<PlaneConfig> {
        Ok(PlaneConfig {
            ring_buffer_bytes: self.ring_buffer_bytes,
            offline_after: Duration::from_secs(self.offline_after_sec),
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            audit_path: Some(self.audit_path.clone()),
            rate_limit: self.rate_limit,
            rate_window: Duration::from_secs(self.rate_window_sec),
            default_grace_ms: self.default_grace_ms,
            default_kill_ms: self.default_kill_ms,
            approval_broadcast: self.approval_broadcast_enum()?,
            prompt_detection: self.prompt_detection,
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
