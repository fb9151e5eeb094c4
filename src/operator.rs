//! Text commands typed by the operator at the console prompt.
//!
//! One line is one command. Parsing is separate from execution so every command
//! can be checked without a running console.

use std::fmt;

use crate::calibration::ConfigField;
use crate::capture::{PoseSolve, ProcedureKind};
use crate::messages::SolveCommand;
use crate::mode::{ModeToggle, OperatingMode};
use crate::session::RecordingOptions;

/// Help text listing every command.
pub const HELP: &str = "\
commands:
  mode <name|rank>               request an operating mode
  toggle <processing|points|triangulation>
  arm <pose|scale|align|origin>  capture the next detection event
  disarm <procedure>             cancel a pending capture
  clear <procedure>              drop captured samples
  solve pose [full|bundle]       submit pose captures
  solve scale [distance_m]       submit scale captures
  solve align                    submit floor alignment captures
  solve origin                   submit the last origin capture
  record start <name> [--raw]    start recording a session
  record stop                    stop recording and export
  export [name]                  export the last session again
  config load|save               load or save calibration
  config edit <field> <json>     replace a calibration field
  camera <exposure> <gain>       update camera settings
  threshold <value>              update point detection threshold
  status                         show console status
  dismiss                        dismiss notices
  help                           show this text
  quit                           stop the console";

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Mode(OperatingMode),
    Toggle(ModeToggle),
    Arm(ProcedureKind),
    Disarm(ProcedureKind),
    Clear(ProcedureKind),
    Solve(SolveCommand),
    StartRecording {
        name: String,
        options: RecordingOptions,
    },
    StopRecording,
    Export(Option<String>),
    LoadCalibration,
    SaveCalibration,
    EditCalibration {
        field: ConfigField,
        raw: String,
    },
    Camera {
        exposure: f64,
        gain: f64,
    },
    Threshold(f64),
    Status,
    Dismiss,
    Help,
    Quit,
}

/// Why a line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (type 'help' for commands)", self.0)
    }
}

impl std::error::Error for ParseError {}

fn err<T>(msg: impl Into<String>) -> Result<T, ParseError> {
    Err(ParseError(msg.into()))
}

fn procedure(arg: Option<&str>) -> Result<ProcedureKind, ParseError> {
    match arg {
        Some(name) => ProcedureKind::parse_name(name)
            .ok_or_else(|| ParseError(format!("unknown procedure '{name}'"))),
        None => err("missing procedure"),
    }
}

fn number(arg: Option<&str>, what: &str) -> Result<f64, ParseError> {
    let Some(arg) = arg else {
        return err(format!("missing {what}"));
    };
    match arg.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => err(format!("invalid {what} '{arg}'")),
    }
}

fn toggle(arg: Option<&str>) -> Result<ModeToggle, ParseError> {
    match arg.map(str::to_lowercase).as_deref() {
        Some("processing" | "image-processing") => Ok(ModeToggle::IMAGE_PROCESSING),
        Some("points" | "point-capture") => Ok(ModeToggle::POINT_CAPTURE),
        Some("triangulation") => Ok(ModeToggle::TRIANGULATION),
        Some(other) => err(format!("unknown toggle '{other}'")),
        None => err("missing toggle"),
    }
}

impl OperatorCommand {
    /// Parse one input line. Empty lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let mut args = rest.split_whitespace();

        let command = match head.to_lowercase().as_str() {
            "mode" => match args.next() {
                Some(name) => match OperatingMode::parse_name(name) {
                    Some(mode) => OperatorCommand::Mode(mode),
                    None => return err(format!("unknown mode '{name}'")),
                },
                None => return err("missing mode"),
            },
            "toggle" => OperatorCommand::Toggle(toggle(args.next())?),
            "arm" => OperatorCommand::Arm(procedure(args.next())?),
            "disarm" => OperatorCommand::Disarm(procedure(args.next())?),
            "clear" => OperatorCommand::Clear(procedure(args.next())?),
            "solve" => {
                let kind = procedure(args.next())?;
                let solve = match kind {
                    ProcedureKind::Pose => match args.next() {
                        None | Some("full") => SolveCommand::Pose(PoseSolve::Full),
                        Some("bundle" | "ba") => SolveCommand::Pose(PoseSolve::BundleAdjustment),
                        Some(other) => return err(format!("unknown pose solve '{other}'")),
                    },
                    ProcedureKind::Scale => SolveCommand::Scale {
                        reference_distance: match args.next() {
                            Some(arg) => Some(number(Some(arg), "reference distance")?),
                            None => None,
                        },
                    },
                    ProcedureKind::Alignment => SolveCommand::Alignment,
                    ProcedureKind::Origin => SolveCommand::Origin,
                };
                OperatorCommand::Solve(solve)
            }
            "record" => match args.next() {
                Some("start") => {
                    let mut name = None;
                    let mut options = RecordingOptions::default();
                    for arg in args.by_ref() {
                        match arg {
                            "--raw" => options.record_raw_media = true,
                            _ if name.is_none() => name = Some(arg.to_string()),
                            _ => return err(format!("unexpected argument '{arg}'")),
                        }
                    }
                    match name {
                        Some(name) => OperatorCommand::StartRecording { name, options },
                        None => return err("missing session name"),
                    }
                }
                Some("stop") => OperatorCommand::StopRecording,
                _ => return err("expected 'record start <name>' or 'record stop'"),
            },
            "export" => OperatorCommand::Export(args.next().map(str::to_string)),
            "config" => match args.next() {
                Some("load") => OperatorCommand::LoadCalibration,
                Some("save") => OperatorCommand::SaveCalibration,
                Some("edit") => {
                    let Some(name) = args.next() else {
                        return err("missing calibration field");
                    };
                    let Some(field) = ConfigField::parse_name(name) else {
                        return err(format!("unknown calibration field '{name}'"));
                    };
                    // The JSON value may contain spaces; take the rest of the line verbatim
                    let raw = rest
                        .splitn(3, char::is_whitespace)
                        .nth(2)
                        .map(str::trim)
                        .unwrap_or("");
                    if raw.is_empty() {
                        return err("missing value");
                    }
                    return Ok(Some(OperatorCommand::EditCalibration {
                        field,
                        raw: raw.to_string(),
                    }));
                }
                _ => return err("expected 'config load', 'config save' or 'config edit'"),
            },
            "camera" => OperatorCommand::Camera {
                exposure: number(args.next(), "exposure")?,
                gain: number(args.next(), "gain")?,
            },
            "threshold" => OperatorCommand::Threshold(number(args.next(), "threshold")?),
            "status" => OperatorCommand::Status,
            "dismiss" => OperatorCommand::Dismiss,
            "help" | "?" => OperatorCommand::Help,
            "quit" | "exit" => OperatorCommand::Quit,
            other => return err(format!("unknown command '{other}'")),
        };

        if let Some(extra) = args.next() {
            return err(format!("unexpected argument '{extra}'"));
        }
        Ok(Some(command))
    }
}
