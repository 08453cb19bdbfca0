fn main() {
    if let Err(err) = auditmail::cli::run() {
        auditmail::ui::eprintln_error(&err);
        std::process::exit(auditmail::exit::exit_code(&err));
    }
}
