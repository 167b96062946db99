fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match tabhop_core::runtime::parse_cli_args(&args) {
        Ok(options) => options,
        Err(error) => {
            eprintln!("[tabhop-core] {error}");
            eprintln!("usage: tabhop-core [--config <path>] [--sources <fixture.json>]");
            std::process::exit(2);
        }
    };

    if let Err(error) = tabhop_core::runtime::run_with_options(options) {
        eprintln!("[tabhop-core] runtime failed: {error}");
        std::process::exit(1);
    }
}
