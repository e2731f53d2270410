//! Site passphrases, from `$XDEDUP_PASSPHRASE` or typed at the terminal
//! with echo off.

use std::error::Error;
use std::io::{self, BufRead, Write};

use xdedup_core::site::KEYS_KEY;
use xdedup_storage::StorageBackend;
use zeroize::Zeroizing;

pub(crate) const PASSPHRASE_ENV: &str = "XDEDUP_PASSPHRASE";

type Secret = Zeroizing<String>;

/// The passphrase that unlocks (or will create) the keys of `site`.
pub(crate) fn site_passphrase(
    storage: &dyn StorageBackend,
    site: &str,
) -> Result<Secret, Box<dyn Error>> {
    if let Ok(pass) = std::env::var(PASSPHRASE_ENV) {
        return Ok(Zeroizing::new(pass));
    }
    ask(site, storage.exists(KEYS_KEY)?, read_secret)
}

/// An existing site is asked once. A new site is asked twice and never
/// gets an empty passphrase.
fn ask(
    site: &str,
    existing: bool,
    mut read: impl FnMut(&str) -> io::Result<Secret>,
) -> Result<Secret, Box<dyn Error>> {
    if existing {
        return Ok(read(&format!("Passphrase for '{site}': "))?);
    }
    let first = read(&format!("New passphrase for '{site}': "))?;
    if first.is_empty() {
        return Err(format!("refusing an empty passphrase for new site '{site}'").into());
    }
    let again = read(&format!("Repeat passphrase for '{site}': "))?;
    if *first != *again {
        return Err("passphrases do not match".into());
    }
    Ok(first)
}

/// Print `label` to stderr and read one line from stdin.
fn read_secret(label: &str) -> io::Result<Secret> {
    let mut err = io::stderr();
    write!(err, "{label}")?;
    err.flush()?;

    let stdin = io::stdin();
    let mut line = Zeroizing::new(String::new());
    {
        let _echo = EchoOff::engage(&stdin)?;
        stdin.lock().read_line(&mut line)?;
    }
    let len = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(len);
    Ok(line)
}

/// Terminal echo is off while this lives. Does nothing when stdin is not a
/// terminal.
#[cfg(unix)]
struct EchoOff {
    fd: std::os::fd::RawFd,
    saved: Option<libc::termios>,
}

#[cfg(unix)]
impl EchoOff {
    fn engage(stdin: &io::Stdin) -> io::Result<Self> {
        use std::io::IsTerminal;
        use std::os::fd::AsRawFd;

        let fd = stdin.as_raw_fd();
        if !stdin.is_terminal() {
            return Ok(Self { fd, saved: None });
        }
        // SAFETY: termios is plain old data and tcgetattr overwrites it.
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        // SAFETY: fd is stdin's descriptor and `saved` is a valid out-pointer.
        if unsafe { libc::tcgetattr(fd, &mut saved) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let mut quiet = saved;
        quiet.c_lflag &= !libc::ECHO;
        // Still echo the final newline so the next output starts on its own line.
        quiet.c_lflag |= libc::ECHONL;
        // SAFETY: fd is a terminal and `quiet` came from tcgetattr.
        if unsafe { libc::tcsetattr(fd, libc::TCSAFLUSH, &quiet) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd,
            saved: Some(saved),
        })
    }
}

#[cfg(unix)]
impl Drop for EchoOff {
    fn drop(&mut self) {
        if let Some(saved) = &self.saved {
            // SAFETY: restores the settings read by tcgetattr on the same fd.
            unsafe {
                libc::tcsetattr(self.fd, libc::TCSANOW, saved);
            }
        }
    }
}

#[cfg(not(unix))]
struct EchoOff;

#[cfg(not(unix))]
impl EchoOff {
    fn engage(_stdin: &io::Stdin) -> io::Result<Self> {
        Ok(EchoOff)
    }
}
