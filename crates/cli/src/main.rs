fn main() {
    stitch_cli::init_tracing();

    if let Err(error) = stitch_cli::run(std::env::args_os()) {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}
