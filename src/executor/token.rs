//! Process creation with a borrowed user token
//!
//! `std::process` cannot attach a token, so the child is created directly with
//! `CreateProcessAsUserW` and its pipe ends are handed to Tokio as files.

use std::ffi::{c_void, OsStr};
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{FromRawHandle, RawHandle};
use std::os::windows::process::ExitStatusExt;
use std::process::ExitStatus;
use std::ptr;

use windows_sys::Win32::Foundation::{
    CloseHandle, SetHandleInformation, HANDLE, HANDLE_FLAG_INHERIT,
};
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::System::Console::{
    GetStdHandle, STD_ERROR_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows_sys::Win32::System::Pipes::CreatePipe;
use windows_sys::Win32::System::Threading::{
    CreateProcessAsUserW, GetExitCodeProcess, TerminateProcess, WaitForSingleObject,
    CREATE_UNICODE_ENVIRONMENT, INFINITE, PROCESS_INFORMATION, STARTF_USESTDHANDLES,
    STARTUPINFOW,
};

use super::process::{ChildProcess, PipeReader, PipeWriter, PreparedCommand, SpawnedChild, StdioMode};
use crate::error::ExecError;
use crate::identity::PrimaryToken;

/// Process created through `CreateProcessAsUserW`
#[derive(Debug)]
pub struct TokenChild {
    process: Handle,
    pid: u32,
}

#[derive(Debug)]
struct Handle(HANDLE);

// SAFETY: process handles may be used from any thread
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.0.is_null() {
            // SAFETY: we own the handle
            unsafe { CloseHandle(self.0) };
        }
    }
}

impl TokenChild {
    pub fn id(&self) -> u32 {
        self.pid
    }

    pub fn kill(&mut self) -> io::Result<()> {
        // SAFETY: the process handle is valid until drop
        if unsafe { TerminateProcess(self.process.0, 1) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        let raw = self.process.0 as usize;
        tokio::task::spawn_blocking(move || {
            let handle = raw as HANDLE;
            // SAFETY: the handle outlives this task because `wait` borrows the child
            unsafe { WaitForSingleObject(handle, INFINITE) };
            let mut code = 0u32;
            // SAFETY: as above
            if unsafe { GetExitCodeProcess(handle, &mut code) } == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(ExitStatus::from_raw(code))
        })
        .await
        .map_err(io::Error::other)?
    }
}

/// Anonymous pipe; `child` is the inheritable end
struct Pipe {
    parent: Handle,
    child: Handle,
}

fn pipe(child_reads: bool) -> io::Result<Pipe> {
    let attrs = SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: ptr::null_mut(),
        bInheritHandle: 1,
    };
    let mut read: HANDLE = ptr::null_mut();
    let mut write: HANDLE = ptr::null_mut();
    // SAFETY: out-pointers are valid
    if unsafe { CreatePipe(&mut read, &mut write, &attrs, 0) } == 0 {
        return Err(io::Error::last_os_error());
    }
    let (parent, child) = if child_reads {
        (Handle(write), Handle(read))
    } else {
        (Handle(read), Handle(write))
    };
    // SAFETY: `parent.0` is a handle we just created
    if unsafe { SetHandleInformation(parent.0, HANDLE_FLAG_INHERIT, 0) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(Pipe { parent, child })
}

fn into_file(handle: Handle) -> tokio::fs::File {
    let raw = handle.0 as RawHandle;
    std::mem::forget(handle);
    // SAFETY: ownership of the handle moves into the file
    tokio::fs::File::from_std(unsafe { std::fs::File::from_raw_handle(raw) })
}

fn wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

/// Quote one argument following the MSVCRT parsing rules
fn quote_arg(arg: &str, out: &mut String) {
    let needs_quotes = arg.is_empty() || arg.contains([' ', '\t', '"']);
    if !needs_quotes {
        out.push_str(arg);
        return;
    }
    out.push('"');
    let mut backslashes = 0usize;
    for ch in arg.chars() {
        match ch {
            '\\' => backslashes += 1,
            '"' => {
                out.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            _ => {
                out.extend(std::iter::repeat('\\').take(backslashes));
                out.push(ch);
                backslashes = 0;
            }
        }
    }
    out.extend(std::iter::repeat('\\').take(backslashes * 2));
    out.push('"');
}

fn command_line(prepared: &PreparedCommand) -> Vec<u16> {
    let mut line = String::new();
    quote_arg(&prepared.program.to_string_lossy(), &mut line);
    for arg in &prepared.args {
        line.push(' ');
        quote_arg(arg, &mut line);
    }
    wide(OsStr::new(&line))
}

/// `KEY=VALUE\0...\0\0` block
fn environment_block(env: &[(String, String)]) -> Vec<u16> {
    let mut block = Vec::new();
    for (key, value) in env {
        block.extend(OsStr::new(&format!("{}={}", key, value)).encode_wide());
        block.push(0);
    }
    if block.is_empty() {
        block.push(0);
    }
    block.push(0);
    block
}

pub(super) fn spawn_with_token(
    prepared: &PreparedCommand,
    token: &PrimaryToken,
    mode: StdioMode,
) -> Result<SpawnedChild, ExecError> {
    let start_error = |source: io::Error| ExecError::Start {
        command: prepared.display.clone(),
        source,
    };

    // SAFETY: STARTUPINFOW is plain data
    let mut startup: STARTUPINFOW = unsafe { std::mem::zeroed() };
    startup.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
    startup.dwFlags = STARTF_USESTDHANDLES;

    let mut pipes: Option<(Option<Pipe>, Pipe, Pipe)> = None;
    match mode {
        StdioMode::Piped { stdin } => {
            let stdin = if stdin {
                Some(pipe(true).map_err(start_error)?)
            } else {
                None
            };
            let stdout = pipe(false).map_err(start_error)?;
            let stderr = pipe(false).map_err(start_error)?;
            startup.hStdInput = stdin.as_ref().map_or(ptr::null_mut(), |p| p.child.0);
            startup.hStdOutput = stdout.child.0;
            startup.hStdError = stderr.child.0;
            pipes = Some((stdin, stdout, stderr));
        }
        StdioMode::Inherit => {
            // SAFETY: GetStdHandle has no preconditions
            unsafe {
                startup.hStdInput = GetStdHandle(STD_INPUT_HANDLE);
                startup.hStdOutput = GetStdHandle(STD_OUTPUT_HANDLE);
                startup.hStdError = GetStdHandle(STD_ERROR_HANDLE);
            }
        }
    }

    let mut cmdline = command_line(prepared);
    let env_block = prepared.environment.as_deref().map(environment_block);
    let cwd = prepared.working_dir.as_ref().map(|d| wide(d.as_os_str()));
    let application = wide(prepared.program.as_os_str());

    // SAFETY: PROCESS_INFORMATION is plain data
    let mut info: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };
    // SAFETY: every pointer refers to a live, NUL-terminated buffer owned by this frame
    let ok = unsafe {
        CreateProcessAsUserW(
            token.as_raw(),
            application.as_ptr(),
            cmdline.as_mut_ptr(),
            ptr::null(),
            ptr::null(),
            1,
            CREATE_UNICODE_ENVIRONMENT,
            env_block
                .as_ref()
                .map_or(ptr::null(), |b| b.as_ptr() as *const c_void),
            cwd.as_ref().map_or(ptr::null(), |d| d.as_ptr()),
            &startup,
            &mut info,
        )
    };
    if ok == 0 {
        return Err(start_error(io::Error::last_os_error()));
    }
    drop(Handle(info.hThread));

    tracing::debug!(pid = info.dwProcessId, command = %prepared.display, "spawned with user token");

    let process = ChildProcess::Token(TokenChild {
        process: Handle(info.hProcess),
        pid: info.dwProcessId,
    });

    // The child-side ends drop (and close) here; the child holds its own copies
    let (stdin, stdout, stderr) = match pipes {
        Some((stdin, stdout, stderr)) => (
            stdin.map(|p| Box::new(into_file(p.parent)) as PipeWriter),
            Some(Box::new(into_file(stdout.parent)) as PipeReader),
            Some(Box::new(into_file(stderr.parent)) as PipeReader),
        ),
        None => (None, None, None),
    };

    Ok(SpawnedChild {
        process,
        stdin,
        stdout,
        stderr,
    })
}
