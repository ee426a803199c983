use termexec::logging::init_logging;

mod app;
pub(crate) mod color;
mod commands;

fn main() {
    let app = app::build_cli();
    let matches = app.get_matches();

    if matches.get_flag("no-color") {
        color::set_no_color();
    }

    let verbose = matches.get_flag("verbose");
    init_logging(!verbose);

    match commands::run_command(&matches) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // Handlers already reported the error to the user.
            drop(e);
            std::process::exit(1);
        }
    }
}
