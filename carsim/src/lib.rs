pub mod carsim_environment;
pub mod config;
pub mod hardware;
pub mod reward;
pub mod sensor;
pub mod vehicle;
pub mod world;

#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}
