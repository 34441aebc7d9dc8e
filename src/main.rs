fn main() {
    if let Err(err) = tabledef::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
