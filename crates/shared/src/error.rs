//! Error taxonomy for chat generation.
//!
//! Display strings double as the user-facing message rendered into the
//! conversation when a send fails, so they are written in the app's
//! language rather than as developer diagnostics.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// No usable credential resolved for the cloud backend.
    #[error("Kunci API belum dikonfigurasi. Tambahkan kunci di pengaturan aplikasi.")]
    MissingApiKey,

    /// Upstream reported quota exhaustion. Not retried.
    #[error("Kuota harian API sudah habis. Coba lagi besok atau aktifkan mode offline.")]
    QuotaExceeded,

    /// Upstream throttled the request. Not retried.
    #[error("Terlalu banyak permintaan dalam waktu singkat. Tunggu sebentar lalu coba lagi.")]
    RateLimited,

    /// Any other upstream failure, wrapped with a generic prefix.
    #[error("Gagal menghubungi layanan AI: {0}")]
    Upstream(String),

    /// Model download or setup failed; the caller must reset any
    /// in-progress UI state (progress bar, downloading flag).
    #[error("Gagal menyiapkan model offline: {0}")]
    EngineSetup(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_user_facing() {
        assert!(ChatError::MissingApiKey.to_string().contains("Kunci API"));
        assert!(ChatError::Upstream("timeout".into())
            .to_string()
            .contains("timeout"));
    }
}
