//! Display utilities for the Pomodoro Timer CLI.
//!
//! This module provides formatted output for:
//! - Success messages
//! - Error messages
//! - Status display

use crate::clock::Millis;
use crate::cycle::CYCLE_LENGTH;
use crate::types::{IpcResponse, PersistedState, Preset, ResponseData};
use crate::viewer::surface::{format_time, session_label};

// ============================================================================
// Display
// ============================================================================

/// Display utilities for CLI output.
pub struct Display;

impl Display {
    /// Shows the result of a start command.
    pub fn show_start_success(response: &IpcResponse) {
        Self::show_result("*", response);
    }

    /// Shows the result of a pause command.
    pub fn show_pause_success(response: &IpcResponse) {
        Self::show_result("||", response);
    }

    /// Shows the result of a reset command.
    pub fn show_reset_success(response: &IpcResponse) {
        Self::show_result("[]", response);
    }

    /// Shows the result of a preset.
    pub fn show_preset_success(preset: Preset, response: &IpcResponse) {
        println!(
            "* プリセット {} を開始しました",
            format_time(preset.seconds())
        );
        if let Some(data) = &response.data {
            println!("  {}", Self::session_line(data));
        }
    }

    /// Shows the result of a jump command.
    pub fn show_jump_success(response: &IpcResponse) {
        Self::show_result(">", response);
    }

    /// Shows the current timer status reported by the daemon.
    pub fn show_status(response: &IpcResponse) {
        match &response.data {
            Some(data) => {
                for line in Self::status_lines(&data.state, data.remaining_seconds) {
                    println!("{}", line);
                }
            }
            None => println!("タイマーの状態を取得できませんでした"),
        }
    }

    /// Shows the last persisted status when the daemon is not reachable.
    pub fn show_offline_status(state: Option<&PersistedState>, now: Millis) {
        match state {
            Some(state) => {
                for line in Self::status_lines(state, state.remaining_at(now)) {
                    println!("{}", line);
                }
            }
            None => println!("保存された状態はありません"),
        }
        println!("(Daemonは起動していません)");
    }

    /// Shows an error message.
    pub fn show_error(message: &str) {
        eprintln!("エラー: {}", message);
    }

    fn show_result(marker: &str, response: &IpcResponse) {
        println!("{} {}", marker, response.message);
        if let Some(data) = &response.data {
            println!("  {}", Self::session_line(data));
        }
    }

    /// One-line summary: session, position and remaining time.
    fn session_line(data: &ResponseData) -> String {
        format!(
            "{} [{}/{}] 残り時間: {}",
            session_label(data.state.session_type),
            data.state.cycle_position,
            CYCLE_LENGTH,
            format_time(data.remaining_seconds)
        )
    }

    /// Lines of the status block.
    fn status_lines(state: &PersistedState, remaining: u32) -> Vec<String> {
        let running = if state.is_running {
            "実行中"
        } else {
            "停止中"
        };
        vec![
            "ポモドーロタイマー ステータス".to_string(),
            "─────────────────────────────".to_string(),
            format!("状態: {}", running),
            format!("セッション: {}", session_label(state.session_type)),
            format!("周期位置: {}/{}", state.cycle_position, CYCLE_LENGTH),
            format!("残り時間: {}", format_time(remaining)),
        ]
    }
}

// ============================================================================
// Tests
// ============================================================================
