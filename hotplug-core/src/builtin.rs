//! Identifiers of the in-process builtin commands a run-list entry may name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinCommand {
    Blkid,
    Btrfs,
    Hwdb,
    InputId,
    Keyboard,
    Kmod,
    NetId,
    NetSetupLink,
    PathId,
    Uaccess,
    UsbId,
}

impl BuiltinCommand {
    pub const ALL: [BuiltinCommand; 11] = [
        BuiltinCommand::Blkid,
        BuiltinCommand::Btrfs,
        BuiltinCommand::Hwdb,
        BuiltinCommand::InputId,
        BuiltinCommand::Keyboard,
        BuiltinCommand::Kmod,
        BuiltinCommand::NetId,
        BuiltinCommand::NetSetupLink,
        BuiltinCommand::PathId,
        BuiltinCommand::Uaccess,
        BuiltinCommand::UsbId,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinCommand::Blkid => "blkid",
            BuiltinCommand::Btrfs => "btrfs",
            BuiltinCommand::Hwdb => "hwdb",
            BuiltinCommand::InputId => "input_id",
            BuiltinCommand::Keyboard => "keyboard",
            BuiltinCommand::Kmod => "kmod",
            BuiltinCommand::NetId => "net_id",
            BuiltinCommand::NetSetupLink => "net_setup_link",
            BuiltinCommand::PathId => "path_id",
            BuiltinCommand::Uaccess => "uaccess",
            BuiltinCommand::UsbId => "usb_id",
        }
    }

    /// Looks up the builtin named by the first word of a command line.
    pub fn lookup(command: &str) -> Option<Self> {
        let word = command.split_whitespace().next()?;
        word.parse().ok()
    }
}

impl fmt::Display for BuiltinCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuiltinCommand {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|b| b.name() == s)
            .ok_or_else(|| DeviceError::UnknownBuiltin(s.to_string()))
    }
}
