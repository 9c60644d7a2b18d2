use dice10001::cli::{Args, BaseCommand, Command};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::new(pico_args::Arguments::from_env());

    match BaseCommand::try_from_cli_args(args).and_then(BaseCommand::run) {
        Ok(out) => println!("{}", out),
        Err(err) => {
            eprintln!("error: {}", err);
            eprintln!("Try 'dice10001 --help' for more information.");
            std::process::exit(1);
        }
    }
}
