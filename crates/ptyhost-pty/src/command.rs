//! Command description and its pre-fork marshalling
//!
//! [`CommandSpec`] is the owned, host-friendly description of what to run.
//! [`ExecImage`] is the same data copied into C strings with NULL-terminated
//! pointer arrays, built in the parent so the forked child only reads it.

use std::ffi::{CString, OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::ptr;

use crate::SpawnError;

/// Program, argument vector, environment and working directory of a child.
///
/// `argv` is the full vector handed to `exec`, `argv[0]` included. The
/// environment is a list of `KEY=VALUE` entries and is the child's whole
/// environment: nothing is inherited from the host unless added with
/// [`CommandSpec::inherit_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: PathBuf,
    argv: Vec<OsString>,
    env: Vec<OsString>,
    cwd: PathBuf,
}

impl CommandSpec {
    /// Run `program` with `argv[0]` set to the program itself, an empty
    /// environment, in the current directory.
    pub fn new(program: impl AsRef<Path>) -> Self {
        let program = program.as_ref().to_path_buf();
        Self {
            argv: vec![program.clone().into_os_string()],
            program,
            env: Vec::new(),
            cwd: PathBuf::from("."),
        }
    }

    /// Append one argument after the existing ones
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.argv.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.argv
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Replace `argv[0]`, e.g. with `-sh` for a login shell
    pub fn argv0(mut self, argv0: impl AsRef<OsStr>) -> Self {
        match self.argv.first_mut() {
            Some(first) => *first = argv0.as_ref().to_os_string(),
            None => self.argv.push(argv0.as_ref().to_os_string()),
        }
        self
    }

    /// Replace the whole argument vector, `argv[0]` included
    pub fn with_argv<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.argv = argv.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        let mut entry = key.as_ref().to_os_string();
        entry.push("=");
        entry.push(value.as_ref());
        self.env.push(entry);
        self
    }

    /// Add a raw `KEY=VALUE` entry
    pub fn env_entry(mut self, entry: impl AsRef<OsStr>) -> Self {
        self.env.push(entry.as_ref().to_os_string());
        self
    }

    pub fn envs<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.env
            .extend(entries.into_iter().map(|e| e.as_ref().to_os_string()));
        self
    }

    /// Drop every entry for `key`, then append `key=value`.
    pub fn set_env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        let mut prefix = key.as_ref().to_os_string().into_vec();
        prefix.push(b'=');
        self.env.retain(|entry| !entry.as_bytes().starts_with(&prefix));
        self.env(key, value)
    }

    /// Copy the host's current environment into the list.
    pub fn inherit_env(mut self) -> Self {
        for (key, value) in std::env::vars_os() {
            self = self.env(key, value);
        }
        self
    }

    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = cwd.as_ref().to_path_buf();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn argv(&self) -> &[OsString] {
        &self.argv
    }

    pub fn env_entries(&self) -> &[OsString] {
        &self.env
    }

    pub fn working_dir(&self) -> &Path {
        &self.cwd
    }

    /// Copy every string into an [`ExecImage`].
    pub fn to_exec_image(&self) -> Result<ExecImage, SpawnError> {
        let program = to_cstring(self.program.as_os_str(), "program path", 0)?;
        let argv_strings = if self.argv.is_empty() {
            vec![program.clone()]
        } else {
            self.argv
                .iter()
                .enumerate()
                .map(|(i, a)| to_cstring(a, "argument", i))
                .collect::<Result<Vec<_>, _>>()?
        };
        let env_strings = self
            .env
            .iter()
            .enumerate()
            .map(|(i, e)| to_cstring(e, "environment entry", i))
            .collect::<Result<Vec<_>, _>>()?;
        let cwd = to_cstring(self.cwd.as_os_str(), "working directory", 0)?;

        let argv = null_terminated(&argv_strings);
        let envp = null_terminated(&env_strings);

        Ok(ExecImage {
            chdir_context: diagnostic_prefix("chdir", cwd.as_bytes()),
            exec_context: diagnostic_prefix("exec", program.as_bytes()),
            program,
            cwd,
            argv,
            envp,
            _argv_strings: argv_strings,
            _env_strings: env_strings,
        })
    }
}

/// A [`CommandSpec`] flattened into the shapes `execvp` and `chdir` take.
///
/// The pointer arrays point into the owned strings held alongside them, so
/// they stay valid for as long as the image lives, in the parent and in
/// the forked copy of its address space alike.
pub struct ExecImage {
    program: CString,
    cwd: CString,
    argv: Vec<*const libc::c_char>,
    envp: Vec<*const libc::c_char>,
    chdir_context: Vec<u8>,
    exec_context: Vec<u8>,
    _argv_strings: Vec<CString>,
    _env_strings: Vec<CString>,
}

impl ExecImage {
    pub fn program(&self) -> &CString {
        &self.program
    }

    pub fn cwd(&self) -> &CString {
        &self.cwd
    }

    /// NULL-terminated `argv` array
    pub fn argv_ptr(&self) -> *const *const libc::c_char {
        self.argv.as_ptr()
    }

    /// NULL-terminated `envp` array
    pub fn envp_ptr(&self) -> *const *const libc::c_char {
        self.envp.as_ptr()
    }

    pub fn argc(&self) -> usize {
        self.argv.len() - 1
    }

    pub fn envc(&self) -> usize {
        self.envp.len() - 1
    }

    /// `chdir("<cwd>")`, the prefix written before a chdir error
    pub fn chdir_context(&self) -> &[u8] {
        &self.chdir_context
    }

    /// `exec("<program>")`, the prefix written before an exec error
    pub fn exec_context(&self) -> &[u8] {
        &self.exec_context
    }
}

impl std::fmt::Debug for ExecImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecImage")
            .field("program", &self.program)
            .field("cwd", &self.cwd)
            .field("argv", &self._argv_strings)
            .field("envc", &self.envc())
            .finish()
    }
}

fn to_cstring(s: &OsStr, what: &'static str, index: usize) -> Result<CString, SpawnError> {
    CString::new(s.to_os_string().into_vec())
        .map_err(|_| SpawnError::InvalidArgument { what, index })
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

fn diagnostic_prefix(call: &str, subject: &[u8]) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(call.len() + subject.len() + 4);
    prefix.extend_from_slice(call.as_bytes());
    prefix.extend_from_slice(b"(\"");
    prefix.extend_from_slice(subject);
    prefix.extend_from_slice(b"\")");
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    fn collect(ptrs: *const *const libc::c_char, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| unsafe {
                CStr::from_ptr(*ptrs.add(i))
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[test]
    fn test_new_seeds_argv0_with_program() {
        let spec = CommandSpec::new("/bin/sh").arg("-c").arg("true");
        assert_eq!(spec.argv(), &["/bin/sh", "-c", "true"]);
        assert_eq!(spec.working_dir(), Path::new("."));
        assert!(spec.env_entries().is_empty());
    }

    #[test]
    fn test_argv0_replaces_first_entry() {
        let spec = CommandSpec::new("/bin/bash").argv0("-bash");
        assert_eq!(spec.argv(), &["-bash"]);
    }

    #[test]
    fn test_env_formats_key_value() {
        let spec = CommandSpec::new("/bin/true")
            .env("TERM", "xterm-256color")
            .env_entry("LANG=C.UTF-8");
        assert_eq!(spec.env_entries(), &["TERM=xterm-256color", "LANG=C.UTF-8"]);
    }

    #[test]
    fn test_exec_image_arrays_are_null_terminated() {
        let image = CommandSpec::new("/bin/echo")
            .arg("hello")
            .env("A", "1")
            .to_exec_image()
            .unwrap();

        assert_eq!(image.argc(), 2);
        assert_eq!(image.envc(), 1);
        assert_eq!(collect(image.argv_ptr(), 2), vec!["/bin/echo", "hello"]);
        assert_eq!(collect(image.envp_ptr(), 1), vec!["A=1"]);
        unsafe {
            assert!((*image.argv_ptr().add(2)).is_null());
            assert!((*image.envp_ptr().add(1)).is_null());
        }
    }

    #[test]
    fn test_empty_argv_falls_back_to_program() {
        let image = CommandSpec::new("/bin/true")
            .with_argv(Vec::<String>::new())
            .to_exec_image()
            .unwrap();
        assert_eq!(collect(image.argv_ptr(), image.argc()), vec!["/bin/true"]);
    }

    #[test]
    fn test_interior_nul_is_rejected() {
        let err = CommandSpec::new("/bin/echo")
            .arg("ok")
            .arg("bad\0arg")
            .to_exec_image()
            .unwrap_err();
        match err {
            SpawnError::InvalidArgument { what, index } => {
                assert_eq!(what, "argument");
                assert_eq!(index, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_diagnostic_prefixes() {
        let image = CommandSpec::new("/no/such/bin")
            .cwd("/no/such/dir")
            .to_exec_image()
            .unwrap();
        assert_eq!(image.chdir_context(), b"chdir(\"/no/such/dir\")");
        assert_eq!(image.exec_context(), b"exec(\"/no/such/bin\")");
    }

    #[test]
    fn test_image_outlives_spec() {
        let image = {
            let spec = CommandSpec::new("/bin/echo").arg("scoped");
            spec.to_exec_image().unwrap()
        };
        assert_eq!(collect(image.argv_ptr(), 2), vec!["/bin/echo", "scoped"]);
    }

    #[test]
    fn test_inherit_env_copies_host_environment() {
        let spec = CommandSpec::new("/bin/true").inherit_env();
        let host: Vec<OsString> = std::env::vars_os()
            .map(|(mut key, value)| {
                key.push("=");
                key.push(value);
                key
            })
            .collect();
        assert_eq!(spec.env_entries(), host.as_slice());
    }

    #[test]
    fn test_set_env_replaces_earlier_entries() {
        let spec = CommandSpec::new("/bin/true")
            .env("TERM", "dumb")
            .env("TERMINFO", "/usr/share/terminfo")
            .env_entry("TERM=vt100")
            .set_env("TERM", "xterm-256color");
        assert_eq!(
            spec.env_entries(),
            &["TERMINFO=/usr/share/terminfo", "TERM=xterm-256color"]
        );
    }
}
