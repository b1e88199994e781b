//! Small internal utilities

mod locked;

pub(crate) use locked::Locked;
