use clap::Parser;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Ad-hoc file server: download from served directories, upload with a
/// multipart POST, manage served paths from the console.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "filedrop",
    version,
    after_help = "Type \"exit\" or close stdin to stop; transfers get a few seconds to finish.\n\
                  Ctrl-C stops the process immediately."
)]
pub struct Args {
    /// Ip to start the server on
    #[arg(short, long, env = "FILEDROP_IP", default_value = "0.0.0.0")]
    pub ip: IpAddr,

    /// Port for the upload server to serve at
    #[arg(short, long, env = "FILEDROP_PORT", default_value_t = 7777)]
    pub port: u16,

    /// Directory to serve (default: current directory)
    #[arg(short = 'd', long)]
    pub serve_dir: Option<String>,

    /// Directory to save files (default: current directory)
    #[arg(short = 's', long)]
    pub save_dir: Option<String>,

    /// Worker threads handling connections
    #[arg(short, long, default_value_t = 16)]
    pub workers: usize,

    /// Socket read/write timeout in seconds
    #[arg(short, long, default_value_t = 10)]
    pub timeout: u64,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Validated settings handed to the server and console.
#[derive(Debug, Clone)]
pub struct Config {
    pub ip: IpAddr,
    pub port: u16,
    pub serve_dir: PathBuf,
    pub save_dir: PathBuf,
    pub workers: usize,
    pub timeout: Duration,
    pub verbose: u8,
}

impl Config {
    pub fn load() -> anyhow::Result<Config> {
        Config::from_args(Args::parse())
    }

    /// Missing directories fall back to the current one, with a notice.
    pub fn from_args(args: Args) -> anyhow::Result<Config> {
        let cwd = std::env::current_dir()?;

        let serve_dir = directory_or(args.serve_dir.as_deref(), &cwd, "serve");
        let save_dir = directory_or(args.save_dir.as_deref(), &cwd, "save uploads to");

        Ok(Config {
            ip: args.ip,
            port: args.port,
            serve_dir,
            save_dir,
            workers: args.workers.max(1),
            timeout: Duration::from_secs(args.timeout.max(1)),
            verbose: args.verbose,
        })
    }

    pub fn url(&self) -> String {
        let host = match self.ip {
            IpAddr::V6(ip) => format!("[{ip}]"),
            IpAddr::V4(ip) => ip.to_string(),
        };
        format!("http://{}:{}", host, self.port)
    }
}

fn directory_or(raw: Option<&str>, fallback: &Path, what: &str) -> PathBuf {
    let Some(raw) = raw else {
        return fallback.to_path_buf();
    };

    match existing_dir(raw) {
        Some(dir) => dir,
        None => {
            println!(
                "→ Path to {} {} does not exist. Using: {}",
                what,
                expand_home(raw).display(),
                fallback.display()
            );
            fallback.to_path_buf()
        }
    }
}

/// Replaces a leading `~` with the home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Absolute form of `raw` when it names an existing directory.
pub fn existing_dir(raw: &str) -> Option<PathBuf> {
    let path = expand_home(raw.trim());
    let path = std::fs::canonicalize(path).ok()?;
    path.is_dir().then_some(path)
}

/// Inverse of [`expand_home`], for display.
pub fn abbreviate_home(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(rest) = path.strip_prefix(&home) {
            return if rest.as_os_str().is_empty() {
                "~".to_string()
            } else {
                format!("~/{}", rest.display())
            };
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["filedrop"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults() {
        let cfg = Config::from_args(args(&[])).unwrap();
        assert_eq!(cfg.port, 7777);
        assert_eq!(cfg.ip.to_string(), "0.0.0.0");
        assert_eq!(cfg.serve_dir, std::env::current_dir().unwrap());
        assert_eq!(cfg.timeout, Duration::from_secs(10));
        assert_eq!(cfg.url(), "http://0.0.0.0:7777");
    }

    #[test]
    fn existing_dirs_are_made_absolute() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_str().unwrap();
        let cfg = Config::from_args(args(&["-d", dir, "-s", dir, "-p", "9000"])).unwrap();
        assert_eq!(cfg.serve_dir, std::fs::canonicalize(tmp.path()).unwrap());
        assert_eq!(cfg.port, 9000);
    }

    #[test]
    fn missing_dir_falls_back_to_cwd() {
        let cfg = Config::from_args(args(&["-d", "/definitely/not/here"])).unwrap();
        assert_eq!(cfg.serve_dir, std::env::current_dir().unwrap());
    }

    #[test]
    fn existing_dir_rejects_files() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("f");
        std::fs::write(&file, b"").unwrap();
        assert!(existing_dir(file.to_str().unwrap()).is_none());
        assert!(existing_dir(tmp.path().to_str().unwrap()).is_some());
    }

    #[test]
    fn home_round_trip() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~"), home);
            assert_eq!(expand_home("~/x"), home.join("x"));
            assert_eq!(abbreviate_home(&home.join("x")), "~/x");
        }
        assert_eq!(expand_home("/abs"), PathBuf::from("/abs"));
    }

    #[test]
    fn help_explains_how_to_stop() {
        let help = Args::command().render_help().to_string();
        assert!(help.contains("\"exit\""));
        assert!(help.contains("Ctrl-C stops the process immediately"));
    }

    #[test]
    fn ipv6_url_is_bracketed() {
        let cfg = Config::from_args(args(&["-i", "::1"])).unwrap();
        assert_eq!(cfg.url(), "http://[::1]:7777");
    }
}
