use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    if let Err(e) = nautilus_rs::cli::run() {
        eprintln!("Error: {e:#}");
        // I/O failures exit with 2, malformed input and bad parameters with 1
        let code = if e
            .chain()
            .any(|c| c.downcast_ref::<std::io::Error>().is_some())
        {
            2
        } else {
            1
        };
        std::process::exit(code);
    }
}
