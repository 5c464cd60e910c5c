//! Tool availability checking for the libimobiledevice backend
//!
//! Resolves the command-line tools the backend drives: `idevice_id` (device
//! enumeration), `idevice_name` (device names), `ideviceinstaller` (app
//! install) and `idevicesyslog` (log streaming).

use std::path::{Path, PathBuf};

use idevhub_core::prelude::*;

/// A libimobiledevice tool used by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    IdeviceId,
    IdeviceName,
    Installer,
    Syslog,
}

impl Tool {
    pub const ALL: [Tool; 4] = [
        Tool::IdeviceId,
        Tool::IdeviceName,
        Tool::Installer,
        Tool::Syslog,
    ];

    /// Executable name looked up on `PATH`
    pub fn binary_name(&self) -> &'static str {
        match self {
            Tool::IdeviceId => "idevice_id",
            Tool::IdeviceName => "idevice_name",
            Tool::Installer => "ideviceinstaller",
            Tool::Syslog => "idevicesyslog",
        }
    }
}

/// Explicit tool locations that take precedence over `PATH`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOverrides {
    pub idevice_id: Option<PathBuf>,
    pub idevice_name: Option<PathBuf>,
    pub ideviceinstaller: Option<PathBuf>,
    pub idevicesyslog: Option<PathBuf>,
}

impl ToolOverrides {
    fn get(&self, tool: Tool) -> Option<&Path> {
        match tool {
            Tool::IdeviceId => self.idevice_id.as_deref(),
            Tool::IdeviceName => self.idevice_name.as_deref(),
            Tool::Installer => self.ideviceinstaller.as_deref(),
            Tool::Syslog => self.idevicesyslog.as_deref(),
        }
    }
}

/// Resolved locations of the external tools
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    pub idevice_id: Option<PathBuf>,
    pub idevice_name: Option<PathBuf>,
    pub ideviceinstaller: Option<PathBuf>,
    pub idevicesyslog: Option<PathBuf>,
}

impl ToolAvailability {
    /// Check tool availability (run once per capability load)
    pub fn check(overrides: &ToolOverrides) -> Self {
        let mut availability = Self::default();
        for tool in Tool::ALL {
            let resolved = Self::resolve(tool, overrides.get(tool));
            match &resolved {
                Some(path) => debug!("{} resolved to {}", tool.binary_name(), path.display()),
                None => debug!("{} not found", tool.binary_name()),
            }
            *availability.slot_mut(tool) = resolved;
        }
        availability
    }

    /// Resolve one tool, preferring an explicit override
    fn resolve(tool: Tool, override_path: Option<&Path>) -> Option<PathBuf> {
        match override_path {
            Some(path) if path.is_absolute() => path.exists().then(|| path.to_path_buf()),
            Some(path) => which::which(path)
                .inspect_err(|e| debug!("{} override lookup failed: {}", path.display(), e))
                .ok(),
            None => which::which(tool.binary_name()).ok(),
        }
    }

    fn slot_mut(&mut self, tool: Tool) -> &mut Option<PathBuf> {
        match tool {
            Tool::IdeviceId => &mut self.idevice_id,
            Tool::IdeviceName => &mut self.idevice_name,
            Tool::Installer => &mut self.ideviceinstaller,
            Tool::Syslog => &mut self.idevicesyslog,
        }
    }

    /// Location of a tool, if it was found
    pub fn path(&self, tool: Tool) -> Option<&Path> {
        match tool {
            Tool::IdeviceId => self.idevice_id.as_deref(),
            Tool::IdeviceName => self.idevice_name.as_deref(),
            Tool::Installer => self.ideviceinstaller.as_deref(),
            Tool::Syslog => self.idevicesyslog.as_deref(),
        }
    }

    /// Location of a tool, or [`Error::ToolNotFound`]
    pub fn require(&self, tool: Tool) -> Result<&Path> {
        self.path(tool)
            .ok_or_else(|| Error::tool_not_found(tool.binary_name()))
    }

    /// Device enumeration is the one tool the backend cannot run without
    pub fn can_enumerate(&self) -> bool {
        self.idevice_id.is_some()
    }

    /// Get user-friendly message when device enumeration is unavailable
    pub fn unavailable_message(&self) -> Option<&'static str> {
        if self.can_enumerate() {
            None
        } else {
            #[cfg(target_os = "macos")]
            {
                Some("libimobiledevice not installed. Run `brew install libimobiledevice`.")
            }

            #[cfg(not(target_os = "macos"))]
            {
                Some("libimobiledevice not installed. Install it with your package manager and make sure usbmuxd is running.")
            }
        }
    }
}
