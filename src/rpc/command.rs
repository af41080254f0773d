//! The remote command vocabulary.
//!
//! Command names map to typed variants through one closed table — there is
//! no reflective lookup. Each command has a fixed arity: the setter takes
//! exactly two numeric arguments, everything else takes none. Legacy
//! clients pad zero-argument commands with dummy numbers, so trailing
//! tokens are tolerated and ignored there.

use crate::error::CommandError;

/// A parsed remote command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// `Set_Heater_Voltage <volts> <increment>` — ramp to the target.
    SetHeaterVoltage { volts: f64, increment: f64 },
    /// `Read_Heater_Voltage`
    ReadHeaterVoltage,
    /// `Read_Heater_Current`
    ReadHeaterCurrent,
    /// `Read_1K_Pot_Temperature`
    ReadOnekPotTemperature,
    /// `Read_IVC_Sorb_Temperature`
    ReadSorbTemperature,
    /// `Read_Needle_Valve_Temperature`
    ReadNeedleValveTemperature,
    /// `Read_Still_Pressure`
    ReadStillPressure,
    /// `Read_Mixing_Chamber_Temperature`
    ReadMixChamberTemperature,
    /// `Read_STM_RX_Temperature`
    ReadStmRxTemperature,
    /// `Read_STM_CX_Temperature`
    ReadStmCxTemperature,
    /// `Unstall_Triton_Loop` — clear a stall and re-enable output.
    UnstallLoop,
    /// `Triton_Stop` — stop the session.
    Stop,
    /// `Triton_Stall_Status`
    StallStatus,
}

impl Command {
    /// Parse one request line into a typed command.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next().ok_or(CommandError::Empty)?;
        match name {
            "Set_Heater_Voltage" => {
                let volts = parse_arg(tokens.next(), "volts")?;
                let increment = parse_arg(tokens.next(), "increment")?;
                Ok(Self::SetHeaterVoltage { volts, increment })
            }
            "Read_Heater_Voltage" => Ok(Self::ReadHeaterVoltage),
            "Read_Heater_Current" => Ok(Self::ReadHeaterCurrent),
            "Read_1K_Pot_Temperature" => Ok(Self::ReadOnekPotTemperature),
            "Read_IVC_Sorb_Temperature" => Ok(Self::ReadSorbTemperature),
            "Read_Needle_Valve_Temperature" => Ok(Self::ReadNeedleValveTemperature),
            "Read_Still_Pressure" => Ok(Self::ReadStillPressure),
            "Read_Mixing_Chamber_Temperature" => Ok(Self::ReadMixChamberTemperature),
            "Read_STM_RX_Temperature" => Ok(Self::ReadStmRxTemperature),
            "Read_STM_CX_Temperature" => Ok(Self::ReadStmCxTemperature),
            "Unstall_Triton_Loop" => Ok(Self::UnstallLoop),
            "Triton_Stop" => Ok(Self::Stop),
            "Triton_Stall_Status" => Ok(Self::StallStatus),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn parse_arg(token: Option<&str>, which: &'static str) -> Result<f64, CommandError> {
    let token = token.ok_or(CommandError::MissingArgument(which))?;
    token
        .parse()
        .map_err(|_| CommandError::BadArgument(token.to_string()))
}
