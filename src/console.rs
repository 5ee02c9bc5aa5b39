//! Operator console: line commands that inspect and change the served paths
//! while the server runs.

use crate::config::{self, Config};
use crate::routes::{RouteError, RouteTable};
use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::sync::Arc;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

pub const PROMPT: &str = "[print \"help\" to see available commands]: ";

const BOLD: &str = "\x1b[1m";
const ITALIC: &str = "\x1b[3m";
const RESET: &str = "\x1b[0m";

pub fn bold(text: &str) -> String {
    format!("{BOLD}{text}{RESET}")
}

fn italic(text: &str) -> String {
    format!("{ITALIC}{text}{RESET}")
}

#[derive(EnumString, EnumIter, Display, Debug, PartialEq, Eq, Clone, Copy)]
#[strum(serialize_all = "lowercase")]
pub enum Command {
    Ls,
    Help,
    Usage,
    Options,
    Exit,
    Path,
}

impl Command {
    fn description(self) -> &'static str {
        match self {
            Command::Ls => "List files in serving directories",
            Command::Help => "Show available commands",
            Command::Usage => "[curl/ps] Print usage",
            Command::Options => "Print options",
            Command::Exit => "Stop server and exit",
            Command::Path => "[add <path>/del <id>/show] Manage served paths",
        }
    }

    fn help_line(self) -> String {
        format!("  {} {}", bold(&self.to_string()), self.description())
    }
}

/// What the command loop should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Console {
    routes: Arc<RouteTable>,
    config: Config,
}

impl Console {
    pub fn new(routes: Arc<RouteTable>, config: Config) -> Console {
        Console { routes, config }
    }

    /// Resolves `~`, checks the directory exists, then registers it.
    pub fn add_route(&self, raw: &str) -> Result<String, RouteError> {
        let dir = config::existing_dir(raw)
            .ok_or_else(|| RouteError::NotADirectory(config::expand_home(raw.trim())))?;
        Ok(self.routes.add(dir))
    }

    pub fn remove_route(&self, id: &str) -> Result<(), RouteError> {
        self.routes.remove(id).map(|_| ())
    }

    pub fn list_routes(&self) -> Vec<(String, String)> {
        self.routes
            .list()
            .into_iter()
            .map(|r| (r.id, config::abbreviate_home(&r.root)))
            .collect()
    }

    /// Runs one input line. Unknown commands do nothing.
    pub fn run_line(&self, line: &str, out: &mut impl Write) -> io::Result<Flow> {
        let line = line.trim();
        let (name, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let Ok(command) = Command::from_str(name) else {
            return Ok(Flow::Continue);
        };

        match command {
            Command::Path => self.path(rest, out)?,
            Command::Ls => self.ls(out)?,
            Command::Help => self.help(rest, out)?,
            Command::Usage => self.usage(rest, out)?,
            Command::Options => self.options(out)?,
            Command::Exit => return Ok(Flow::Exit),
        }

        Ok(Flow::Continue)
    }

    /// Reads commands until `exit` or end of input.
    pub fn run(&self, input: impl BufRead, out: &mut impl Write) -> io::Result<()> {
        write!(out, "{PROMPT}")?;
        out.flush()?;

        for line in input.lines() {
            if self.run_line(&line?, out)? == Flow::Exit {
                return Ok(());
            }
            write!(out, "{PROMPT}")?;
            out.flush()?;
        }

        writeln!(out)?;
        Ok(())
    }

    fn path(&self, args: &str, out: &mut impl Write) -> io::Result<()> {
        let (action, arg) = args.split_once(' ').unwrap_or((args, ""));
        let arg = arg.trim();

        match (action, arg) {
            ("add", path) if !path.is_empty() => match self.add_route(path) {
                Ok(id) => {
                    let root = self.routes.resolve(&id).unwrap_or_default();
                    writeln!(out, "New path added: {}: {}\n", id, root.display())
                }
                Err(e) => writeln!(out, "{e}"),
            },
            ("del", id) if !id.is_empty() => match self.remove_route(id) {
                Ok(()) => writeln!(out, "Path {id} removed"),
                Err(e) => writeln!(out, "{e}"),
            },
            ("show", _) => {
                writeln!(out, "{}", bold("\nServing paths:\n"))?;
                for (id, root) in self.list_routes() {
                    writeln!(out, "• {}  {}/", id, root.trim_end_matches('/'))?;
                }
                writeln!(out)
            }
            _ => writeln!(out, "{}", Command::Path.help_line()),
        }
    }

    fn ls(&self, out: &mut impl Write) -> io::Result<()> {
        for route in self.routes.list() {
            writeln!(out, "\n{} ({}):\n", route.id, route.root.display())?;

            let entries = match std::fs::read_dir(&route.root) {
                Ok(entries) => entries,
                Err(e) => {
                    writeln!(out, "  can't read directory: {e}")?;
                    continue;
                }
            };

            let mut names: Vec<String> = entries
                .filter_map(Result::ok)
                .map(|e| {
                    let mut name = e.file_name().to_string_lossy().into_owned();
                    if e.path().is_dir() {
                        name.push('/');
                    }
                    name
                })
                .collect();
            names.sort_by_key(|n| n.to_lowercase());

            for name in names {
                writeln!(out, "• {name}")?;
            }
        }
        writeln!(out)
    }

    fn help(&self, args: &str, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "{}", bold("\nCLI Commands:"))?;
        match Command::from_str(args) {
            Ok(command) => writeln!(out, "{}", command.help_line())?,
            Err(_) => {
                for command in Command::iter() {
                    writeln!(out, "{}", command.help_line())?;
                }
            }
        }
        writeln!(out)
    }

    fn options(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(
            out,
            "\n{}\n{} {}:{}\n{} {}\n{} {}\n",
            bold("Server options:"),
            bold("→ Server is started on"),
            self.config.ip,
            self.config.port,
            bold("→ Serve at"),
            self.config.serve_dir.display(),
            bold("→ Save uploads to"),
            self.config.save_dir.display(),
        )
    }

    fn usage(&self, args: &str, out: &mut impl Write) -> io::Result<()> {
        let Some(first) = self.routes.first() else {
            return Ok(());
        };
        let url = format!("{}/{}", self.config.url(), first.id);

        writeln!(out, "\n{}\n", bold("Run on the target:"))?;

        if args != "ps" {
            writeln!(out, "{}", italic("cURL command GET:"))?;
            writeln!(out, "    $ curl {url}/\n")?;
            writeln!(out, "{}", italic("cURL command GET (file download):"))?;
            writeln!(out, "    $ curl {url}/File.ps1 -o File.ps1\n")?;
            writeln!(out, "{}", italic("cURL command to upload a file:"))?;
            writeln!(out, "    $ curl {url} -F \"file=@/path/to/image.png\"\n")?;
        }
        if args != "curl" {
            writeln!(out, "{}", italic("PowerShell command to upload a file:"))?;
            writeln!(out, "    PS > $wc = New-Object System.Net.WebClient")?;
            writeln!(out, "    PS > $wc.UploadFile(\"{url}/\", \"C:\\path\\to\\image.png\")\n")?;
        }
        Ok(())
    }
}
