fn main() {
    if let Err(e) = ai_snapper_lib::run() {
        eprintln!("ai-snapper: {}", e);
        std::process::exit(1);
    }
}
