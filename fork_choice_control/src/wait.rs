use std::sync::Mutex;

use crossbeam_utils::sync::WaitGroup;

/// Lets tests wait for every task spawned in response to an `on_*` call.
///
/// Production wiring uses `()` which compiles the whole mechanism away.
pub trait Wait: Clone + Default + Send + 'static {
    type Swappable: Default + Send + Sync;

    fn load_and_clone(swappable: &Self::Swappable) -> Self;
}

impl Wait for () {
    type Swappable = ();

    fn load_and_clone((): &Self::Swappable) -> Self {}
}

impl Wait for WaitGroup {
    type Swappable = Mutex<Self>;

    fn load_and_clone(swappable: &Self::Swappable) -> Self {
        swappable
            .lock()
            .expect("Controller.wait_group mutex is poisoned")
            .clone()
    }
}
