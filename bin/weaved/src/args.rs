use std::path::PathBuf;

use argh::FromArgs;

/// Block-lattice node daemon.
#[derive(Clone, Debug, FromArgs)]
pub struct Args {
    /// path to the TOML config file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    /// data directory, overrides the config file
    #[argh(option, short = 'd')]
    pub data_dir: Option<PathBuf>,

    /// network to join: test, beta or live
    #[argh(option, short = 'n')]
    pub network: Option<String>,

    /// UDP peering port
    #[argh(option)]
    pub peering_port: Option<u16>,

    /// TCP bootstrap port
    #[argh(option)]
    pub bootstrap_port: Option<u16>,

    /// peer to contact at startup, host:port; may repeat
    #[argh(option)]
    pub peer: Vec<String>,
}
