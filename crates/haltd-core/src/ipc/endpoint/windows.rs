//! Named pipe endpoint.
//!
//! A pipe server instance serves exactly one client. The endpoint always
//! holds the next idle instance; `accept` waits on it and creates its
//! successor before handing the connected one to the caller, so a client
//! arriving during a handoff finds an instance (or gets `ERROR_PIPE_BUSY`,
//! which clients retry).

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::io;
use std::ptr;

use tokio::net::windows::named_pipe::{
    ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
};
use tracing::{info, warn};
use windows_sys::Win32::Foundation::{HLOCAL, LocalFree};
use windows_sys::Win32::Security::Authorization::{
    ConvertStringSecurityDescriptorToSecurityDescriptorW, SDDL_REVISION_1,
};
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;

use super::Connection;
use crate::channel::ChannelPath;

pub type ServerStream = NamedPipeServer;
pub type ClientStream = NamedPipeClient;

/// Read/write for interactive users, full control for administrators and
/// LocalSystem.
const PIPE_SDDL: &str = "D:(A;;GRGW;;;BU)(A;;GA;;;BA)(A;;GA;;;SY)";

impl Connection for NamedPipeServer {
    fn disconnect(&mut self) -> io::Result<()> {
        NamedPipeServer::disconnect(self)
    }
}

pub struct Endpoint {
    next: NamedPipeServer,
    path: ChannelPath,
}

impl Endpoint {
    /// Create the first pipe instance. `_mode` only applies to Unix sockets;
    /// the pipe is protected by a DACL instead.
    pub async fn bind(path: &ChannelPath, _mode: u32) -> io::Result<Self> {
        let next = create_instance(path, true)?;
        info!(path = %path, "Channel listening");
        Ok(Self {
            next,
            path: path.clone(),
        })
    }

    /// Wait for a client on the idle instance and replace it with a fresh one.
    pub async fn accept(&mut self) -> io::Result<ServerStream> {
        self.next.connect().await?;
        let successor = create_instance(&self.path, false)?;
        Ok(std::mem::replace(&mut self.next, successor))
    }
}

/// Open a client connection to the pipe at `path`.
pub async fn connect(path: &ChannelPath) -> io::Result<ClientStream> {
    ClientOptions::new().open(path.as_str())
}

fn create_instance(path: &ChannelPath, first: bool) -> io::Result<NamedPipeServer> {
    let mut opts = ServerOptions::new();
    opts.first_pipe_instance(first).reject_remote_clients(true);

    match create_restricted(&opts, path) {
        Ok(server) => Ok(server),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            warn!(path = %path, error = %e, "Pipe DACL rejected, falling back to default security");
            opts.create(path.as_str())
        }
        Err(e) => Err(e),
    }
}

fn create_restricted(opts: &ServerOptions, path: &ChannelPath) -> io::Result<NamedPipeServer> {
    let sddl: Vec<u16> = PIPE_SDDL.encode_utf16().chain(Some(0)).collect();
    let mut descriptor: *mut c_void = ptr::null_mut();

    // SAFETY: `sddl` is NUL-terminated and outlives the call; `descriptor`
    // is a valid out-pointer and is released with LocalFree below.
    let ok = unsafe {
        ConvertStringSecurityDescriptorToSecurityDescriptorW(
            sddl.as_ptr(),
            SDDL_REVISION_1,
            &mut descriptor,
            ptr::null_mut(),
        )
    };
    if ok == 0 || descriptor.is_null() {
        return Err(io::Error::last_os_error());
    }

    let mut attrs = SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: descriptor,
        bInheritHandle: 0,
    };

    // SAFETY: `attrs` points at a valid SECURITY_ATTRIBUTES whose descriptor
    // stays alive until after the call.
    let result = unsafe {
        opts.create_with_security_attributes_raw(path.as_str(), &mut attrs as *mut _ as *mut c_void)
    };

    // SAFETY: `descriptor` was allocated by the conversion above.
    unsafe {
        LocalFree(descriptor as HLOCAL);
    }

    result
}
