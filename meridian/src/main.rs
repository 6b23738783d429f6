use std::process::ExitCode;

use anyhow::Result;
use clap::Parser as _;
use fork_choice_control::StorageError;
use futures::channel::mpsc;
use log::error;
use runtime::Channels;

use crate::meridian_args::MeridianArgs;

mod meridian_args;

// Exit codes: 0 for an orderly stop, 1 for invalid configuration, 2 for
// storage corruption or an unrecoverable commit failure.
const EXIT_CONFIGURATION: u8 = 1;
const EXIT_STORAGE: u8 = 2;

fn main() -> ExitCode {
    let args = MeridianArgs::parse();

    match try_main(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("meridian exited with an error: {error:#}");
            exit_code(&error)
        }
    }
}

fn try_main(args: MeridianArgs) -> Result<()> {
    binary_utils::initialize_logger()?;

    let config = args.into_config()?;

    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    // The channel ends below belong to the external collaborators: the
    // network service, the Eth1 follower, the validator client and the REST
    // API. Their senders are kept alive here so that dropping them does not
    // look like a collaborator failure to the core.
    let (_eth1_tx, eth1_rx) = mpsc::unbounded();
    let (_p2p_to_sync_tx, p2p_to_sync_rx) = mpsc::unbounded();
    let (sync_to_p2p_tx, _sync_to_p2p_rx) = mpsc::unbounded();
    let (sync_to_api_tx, _sync_to_api_rx) = mpsc::unbounded();
    let (pool_to_p2p_tx, _pool_to_p2p_rx) = mpsc::unbounded();
    let (validator_tx, _validator_rx) = mpsc::unbounded();
    let (api_tx, _api_rx) = mpsc::unbounded();

    let channels = Channels {
        eth1_rx,
        p2p_to_sync_rx,
        sync_to_p2p_tx,
        sync_to_api_tx,
        pool_to_p2p_tx,
        validator_tx,
        api_tx,
    };

    tokio_runtime.block_on(runtime::run(config, channels))
}

fn exit_code(error: &anyhow::Error) -> ExitCode {
    let storage_failure = error.downcast_ref::<StorageError>().is_some()
        || error
            .chain()
            .any(|cause| cause.to_string().contains("store commit failed"));

    if storage_failure {
        return ExitCode::from(EXIT_STORAGE);
    }

    ExitCode::from(EXIT_CONFIGURATION)
}
