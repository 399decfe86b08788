//! Front-pipe proxy server.
//!
//! Owns the daemon's own named pipe and runs one handler task per
//! accepted connection.  Each handler loops read-frame → dispatch →
//! write-frame; responses go out on the same connection in request
//! order.  A decode error closes that connection and nothing else.
//!
//! The pipe ACL grants full control to the current user and read/write
//! to Everyone, so clients in the same interactive session can connect
//! no matter how they were launched.

use std::sync::Arc;

#[cfg(windows)]
use agentmux_core::Result;
use agentmux_wire::codec;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::router::{ClientContext, Router};

/// Serve one accepted client connection until it closes, errors, or
/// shutdown is requested.
pub async fn handle_connection<S>(
    mut stream: S,
    router: Arc<Router>,
    ctx: ClientContext,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("closing connection on shutdown");
                break;
            }
            read = codec::read_frame(&mut stream) => match read {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    debug!("closing connection: {e}");
                    break;
                }
            }
        };

        let response = match router.dispatch(frame, &ctx).await {
            Ok(response) => response,
            Err(e) => {
                // Malformed client payload: drop the connection, keep
                // the daemon running.
                debug!("closing connection on malformed request: {e}");
                break;
            }
        };

        if let Err(e) = codec::write_frame(&mut stream, &response).await {
            debug!("closing connection on write failure: {e}");
            break;
        }
    }
}

/// Accept connections on the front pipe until cancelled.
///
/// Returns an error only when the pipe cannot be created at all,
/// typically because another instance already owns the name; that is a
/// startup refusal.
#[cfg(windows)]
pub async fn serve(
    pipe_name: &str,
    router: Arc<Router>,
    cancel: CancellationToken,
) -> Result<()> {
    use tokio_util::task::TaskTracker;

    use crate::backend::normalize_pipe_name;

    let path = normalize_pipe_name(pipe_name);
    let mut server = pipe_security::create_proxy_pipe(&path, true)?;
    let handlers = TaskTracker::new();
    tracing::info!(pipe = %path, "accepting client connections");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("shutdown requested, no longer accepting connections");
                break;
            }
            connected = server.connect() => {
                connected?;
                let stream = std::mem::replace(
                    &mut server,
                    pipe_security::create_proxy_pipe(&path, false)?,
                );
                let peer_pid = pipe_security::client_process_id(&stream);
                let ctx = ClientContext { peer_pid };
                debug!(peer_pid = ?peer_pid, "client connected");

                let router = Arc::clone(&router);
                let cancel = cancel.clone();
                handlers.spawn(handle_connection(stream, router, ctx, cancel));
            }
        }
    }

    // In-flight handlers observe the cancellation at their next
    // suspension point; wait for the last of them to resolve.
    handlers.close();
    handlers.wait().await;
    Ok(())
}

#[cfg(windows)]
mod pipe_security {
    //! Named-pipe creation with an explicit security descriptor, and the
    //! peer-pid query used for connection hints.

    use std::ffi::c_void;
    use std::io;
    use std::os::windows::io::AsRawHandle;
    use std::ptr;

    use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
    use windows_sys::Win32::Foundation::{CloseHandle, LocalFree, HANDLE, HLOCAL};
    use windows_sys::Win32::Security::Authorization::{
        ConvertSidToStringSidW, ConvertStringSecurityDescriptorToSecurityDescriptorW,
    };
    use windows_sys::Win32::Security::{
        GetTokenInformation, TokenUser, SECURITY_ATTRIBUTES, TOKEN_ACCESS_MASK,
        TOKEN_INFORMATION_CLASS, TOKEN_QUERY, TOKEN_USER,
    };
    use windows_sys::Win32::System::Pipes::GetNamedPipeClientProcessId;
    use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    use agentmux_core::{Error, Result};

    /// Create one server instance of the front pipe: byte mode,
    /// unlimited instances, full control for the current user plus
    /// read/write for Everyone.
    pub fn create_proxy_pipe(path: &str, first_instance: bool) -> Result<NamedPipeServer> {
        let sid = current_user_sid()?;
        let sddl = format!("D:(A;;GA;;;{sid})(A;;GRGW;;;WD)");
        let sddl_w = to_wide(&sddl);

        unsafe {
            let mut sd_ptr: *mut c_void = ptr::null_mut();
            let mut sd_size: u32 = 0;
            let ok = ConvertStringSecurityDescriptorToSecurityDescriptorW(
                sddl_w.as_ptr(),
                1,
                &mut sd_ptr as *mut *mut c_void as *mut _,
                &mut sd_size,
            );
            if ok == 0 || sd_ptr.is_null() {
                return Err(Error::Io(io::Error::last_os_error()));
            }

            let mut sa = SECURITY_ATTRIBUTES {
                nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
                lpSecurityDescriptor: sd_ptr,
                bInheritHandle: 0,
            };

            let mut opts = ServerOptions::new();
            opts.first_pipe_instance(first_instance)
                .reject_remote_clients(true);

            let result =
                opts.create_with_security_attributes_raw(path, &mut sa as *mut _ as *mut c_void);

            let _ = LocalFree(sd_ptr as HLOCAL);

            result.map_err(Error::Io)
        }
    }

    /// Peer process id of a connected pipe client, if the OS will say.
    pub fn client_process_id(server: &NamedPipeServer) -> Option<u32> {
        let mut pid: u32 = 0;
        let ok = unsafe { GetNamedPipeClientProcessId(server.as_raw_handle() as HANDLE, &mut pid) };
        (ok != 0 && pid != 0).then_some(pid)
    }

    /// String SID of the user this process runs as.
    fn current_user_sid() -> Result<String> {
        unsafe {
            let mut token: HANDLE = ptr::null_mut();
            let ok = OpenProcessToken(
                GetCurrentProcess(),
                TOKEN_QUERY as TOKEN_ACCESS_MASK,
                &mut token,
            );
            if ok == 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }

            let mut len: u32 = 0;
            let _ = GetTokenInformation(
                token,
                TokenUser as TOKEN_INFORMATION_CLASS,
                ptr::null_mut(),
                0,
                &mut len,
            );
            if len == 0 {
                let _ = CloseHandle(token);
                return Err(Error::Io(io::Error::last_os_error()));
            }

            let mut buf = vec![0u8; len as usize];
            let ok = GetTokenInformation(
                token,
                TokenUser as TOKEN_INFORMATION_CLASS,
                buf.as_mut_ptr() as *mut c_void,
                len,
                &mut len,
            );
            let _ = CloseHandle(token);
            if ok == 0 {
                return Err(Error::Io(io::Error::last_os_error()));
            }

            let token_user = buf.as_ptr() as *const TOKEN_USER;
            let mut sid_str_ptr: *mut u16 = ptr::null_mut();
            let ok = ConvertSidToStringSidW((*token_user).User.Sid, &mut sid_str_ptr);
            if ok == 0 || sid_str_ptr.is_null() {
                return Err(Error::Io(io::Error::last_os_error()));
            }

            let mut len_w = 0;
            while *sid_str_ptr.add(len_w) != 0 {
                len_w += 1;
            }
            let sid = String::from_utf16_lossy(std::slice::from_raw_parts(sid_str_ptr, len_w));
            let _ = LocalFree(sid_str_ptr as HLOCAL);
            Ok(sid)
        }
    }

    fn to_wide(s: &str) -> Vec<u16> {
        use std::os::windows::ffi::OsStrExt;
        std::ffi::OsStr::new(s)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect()
    }
}
