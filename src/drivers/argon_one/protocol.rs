/// Default 7-bit address of the fan microcontroller.
pub const FAN_ADDRESS: u16 = 0x1a;

const FAN_OFF: u8 = 0x00;
const ARM_POWER_CUT: u8 = 0xFF;

/// Single-byte commands understood by the fan microcontroller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Fan power in percent, clamped to 100.
    SetPower(u8),
    FanOff,
    /// Makes the case watch for the imminent power loss after the OS halts.
    ArmPowerCut,
}

impl Command {
    pub fn to_byte(self) -> u8 {
        match self {
            Command::SetPower(percent) => percent.min(100),
            Command::FanOff => FAN_OFF,
            Command::ArmPowerCut => ARM_POWER_CUT,
        }
    }
}
