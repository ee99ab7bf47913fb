//! Viewer error types.

use thiserror::Error;

/// Errors that stop a viewer.
#[derive(Debug, Error)]
pub enum ViewerError {
    /// The display surface is missing; the viewer cannot start without it
    #[error("表示先の端末がありません: {0}")]
    SurfaceUnavailable(String),

    /// Reading user input failed
    #[error("入力の読み込みに失敗しました: {0}")]
    Input(#[from] std::io::Error),
}
