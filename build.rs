//! Renders the `cacheflush(1)` manual page, plus one page per subcommand
//! (`cacheflush-flush(1)`, `cacheflush-campaign(1)`, `cacheflush-serve(1)`),
//! from the CLI definition into `OUT_DIR`.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render_page(
    command: Command,
    title: &str,
    out_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    Man::new(command).title(title).render(&mut buffer)?;
    File::create(out_dir.join(format!("{title}.1")))?.write_all(&buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let command = Cli::command();
    for subcommand in command.get_subcommands() {
        let title = format!("cacheflush-{}", subcommand.get_name());
        render_page(subcommand.clone(), &title, &out_dir)?;
    }
    render_page(command, "cacheflush", &out_dir)?;

    Ok(())
}
