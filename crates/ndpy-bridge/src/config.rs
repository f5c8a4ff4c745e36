//! Conversion options.

use ndpy_types::{Access, AssignErrorMode};

use crate::error::{ConvertError, ConvertResult};

/// Options for converting a host value into an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Requested access; `None` leaves it to the conversion
    pub access: Option<Access>,
    /// Always copy native and foreign arrays instead of viewing them
    pub always_copy: bool,
    /// Let host scalars and short sequences broadcast across dimensions
    pub broadcast: bool,
    /// Checking applied when the generic assignment path converts values
    pub error_mode: AssignErrorMode,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            access: None,
            always_copy: false,
            broadcast: true,
            error_mode: AssignErrorMode::Fractional,
        }
    }
}

impl ConvertOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = Some(access);
        self
    }

    /// Parse and set an access string: `"readwrite"`/`"rw"`, `"readonly"`/`"r"` or `"immutable"`.
    pub fn with_access_str(self, access: &str) -> ConvertResult<Self> {
        let access = access.parse::<Access>().map_err(ConvertError::from)?;
        Ok(self.with_access(access))
    }

    pub fn always_copy(mut self) -> Self {
        self.always_copy = true;
        self
    }

    pub fn with_broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }

    pub fn with_error_mode(mut self, mode: AssignErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    /// Whether the caller asked for a writable result.
    pub fn wants_writable(&self) -> bool {
        self.access == Some(Access::ReadWrite)
    }
}
