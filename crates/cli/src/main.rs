//! The `zectl` binary: parse arguments, run one lifecycle operation,
//! report errors.

fn main() {
    zectl_utils::run_main(|| {
        zectl_utils::initialize_tracing();
        tracing::trace!("starting {}", zectl_utils::NAME);
        zectl_lib::cli::run_from_iter(std::env::args_os())
    })
}
