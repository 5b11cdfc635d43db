//! PTY allocation for a session.
//!
//! A `pty-req` opens a master/slave pair that stays with the session until
//! teardown. The slave is handed to the first command launched on the
//! channel, which gets it as its controlling terminal; the master keeps
//! serving resizes for as long as the session lives.

use portable_pty::{native_pty_system, MasterPty, PtySize, SlavePty};
use protocol::{PtyRequest, WindowChange};

use super::SessionError;

fn clamp(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

fn pty_size(cols: u32, rows: u32, width_px: u32, height_px: u32) -> PtySize {
    PtySize {
        rows: clamp(rows),
        cols: clamp(cols),
        pixel_width: clamp(width_px),
        pixel_height: clamp(height_px),
    }
}

/// Master/slave terminal pair owned by one session.
pub struct PtyPair {
    master: Box<dyn MasterPty + Send>,
    slave: Option<Box<dyn SlavePty + Send>>,
    term: String,
    cols: u16,
    rows: u16,
}

impl std::fmt::Debug for PtyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyPair")
            .field("term", &self.term)
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .field("slave_taken", &self.slave.is_none())
            .finish()
    }
}

impl PtyPair {
    /// Open a pair sized as requested.
    pub fn open(req: &PtyRequest) -> Result<Self, SessionError> {
        let size = pty_size(req.cols, req.rows, req.width_px, req.height_px);
        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| SessionError::Pty(e.to_string()))?;

        tracing::debug!(term = %req.term, cols = size.cols, rows = size.rows, "Allocated PTY");

        Ok(Self {
            master: pair.master,
            slave: Some(pair.slave),
            term: req.term.clone(),
            cols: size.cols,
            rows: size.rows,
        })
    }

    /// Terminal type from the pty-req, used for `TERM`.
    pub fn term(&self) -> &str {
        &self.term
    }

    /// Current size as `(cols, rows)`.
    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    /// Apply a window-change.
    pub fn resize(&mut self, change: &WindowChange) -> Result<(), SessionError> {
        let size = pty_size(change.cols, change.rows, change.width_px, change.height_px);
        self.master
            .resize(size)
            .map_err(|e| SessionError::Pty(e.to_string()))?;
        self.cols = size.cols;
        self.rows = size.rows;
        tracing::debug!(cols = size.cols, rows = size.rows, "Resized PTY");
        Ok(())
    }

    pub(crate) fn master(&self) -> &dyn MasterPty {
        self.master.as_ref()
    }

    /// Hand the slave to a process. Only the first launch gets it.
    pub(crate) fn take_slave(&mut self) -> Option<Box<dyn SlavePty + Send>> {
        self.slave.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn request(cols: u32, rows: u32) -> PtyRequest {
        PtyRequest {
            term: "xterm".to_string(),
            cols,
            rows,
            width_px: 0,
            height_px: 0,
            modes: Bytes::new(),
        }
    }

    #[test]
    fn test_open_applies_initial_size() {
        let pty = PtyPair::open(&request(80, 24)).unwrap();
        assert_eq!(pty.size(), (80, 24));
        assert_eq!(pty.term(), "xterm");

        let actual = pty.master().get_size().unwrap();
        assert_eq!((actual.cols, actual.rows), (80, 24));
    }

    #[test]
    fn test_resize_updates_master() {
        let mut pty = PtyPair::open(&request(80, 24)).unwrap();
        pty.resize(&WindowChange {
            cols: 132,
            rows: 43,
            width_px: 0,
            height_px: 0,
        })
        .unwrap();

        assert_eq!(pty.size(), (132, 43));
        let actual = pty.master().get_size().unwrap();
        assert_eq!((actual.cols, actual.rows), (132, 43));
    }

    #[test]
    fn test_slave_is_taken_once() {
        let mut pty = PtyPair::open(&request(80, 24)).unwrap();
        assert!(pty.take_slave().is_some());
        assert!(pty.take_slave().is_none());
    }

    #[test]
    fn test_oversized_dimensions_are_clamped() {
        let size = pty_size(100_000, 24, 0, 0);
        assert_eq!(size.cols, u16::MAX);
        assert_eq!(size.rows, 24);
    }
}
