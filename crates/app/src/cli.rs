use clap::Parser;

use crate::readout::ReadoutCliArgs;

/// Show the distance to whatever sits at the center of a stereo camera's view.
///
/// Press 'q' in either window to quit.
#[derive(Debug, Parser)]
#[command(name = "depth-sensing", version, about)]
pub struct DepthSensingArgs {
    #[command(flatten)]
    pub readout: ReadoutCliArgs,
}
