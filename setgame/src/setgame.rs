fn main() {
    if let Err(e) = setgame_core::run() {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}
