//! UDP endpoint for the link layer.
//!
//! Binds the node's UDP socket, delivers inbound datagrams to the link
//! layer over a channel, and sends engine transmits without blocking the
//! loop. On Linux the socket error queue is drained for ICMP
//! destination-unreachable reports so the engine can react to PMTU
//! changes (fragmentation-needed, type 3 code 4).

use super::TransportError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM: usize = 65_535;

/// One inbound UDP datagram.
#[derive(Clone, Debug)]
pub struct Datagram {
    /// Remote source address.
    pub from: SocketAddr,
    /// Payload bytes.
    pub data: Vec<u8>,
}

/// Channel receiver for inbound datagrams.
pub type DatagramRx = mpsc::Receiver<Datagram>;

/// An ICMP report pulled from the socket error queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcmpHint {
    /// Destination unreachable, fragmentation needed: the path MTU.
    FragNeeded { from: SocketAddr, mtu: u32 },
    /// Any other destination-unreachable code.
    Unreachable { from: SocketAddr },
}

/// The node's UDP socket plus its receive loop.
pub struct UdpEndpoint {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    recv_task: JoinHandle<()>,
}

impl UdpEndpoint {
    /// Bind a socket and spawn the receive loop. Returns the endpoint and
    /// the channel delivering inbound datagrams.
    pub async fn bind(
        addr: SocketAddr,
        channel_depth: usize,
    ) -> Result<(Self, DatagramRx), TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        let local_addr = socket.local_addr().map_err(TransportError::BindFailed)?;
        let socket = Arc::new(socket);

        #[cfg(target_os = "linux")]
        if local_addr.is_ipv4() {
            enable_recverr(&socket);
        }

        let (datagram_tx, datagram_rx) = mpsc::channel(channel_depth);
        let recv_socket = socket.clone();
        let recv_task = tokio::spawn(async move {
            udp_receive_loop(recv_socket, datagram_tx).await;
        });

        info!(local_addr = %local_addr, "udp endpoint bound");

        Ok((
            Self {
                socket,
                local_addr,
                recv_task,
            },
            datagram_rx,
        ))
    }

    /// Local bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send one datagram without blocking. A full socket buffer drops the
    /// datagram, which UDP permits; the engine will retransmit.
    pub fn send(&self, to: SocketAddr, data: &[u8]) -> Result<(), TransportError> {
        match self.socket.try_send_to(data, to) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!(remote = %to, bytes = data.len(), "udp send dropped: socket full");
                Ok(())
            }
            Err(e) => Err(TransportError::SendFailed(e)),
        }
    }

    /// Drain the socket error queue for ICMP reports.
    #[cfg(target_os = "linux")]
    pub fn drain_icmp(&self) -> Vec<IcmpHint> {
        if !self.local_addr.is_ipv4() {
            return Vec::new();
        }
        drain_err_queue(&self.socket)
    }

    /// Drain the socket error queue for ICMP reports.
    #[cfg(not(target_os = "linux"))]
    pub fn drain_icmp(&self) -> Vec<IcmpHint> {
        Vec::new()
    }
}

impl Drop for UdpEndpoint {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// Receive loop: runs as a spawned task until the channel closes.
async fn udp_receive_loop(socket: Arc<UdpSocket>, datagram_tx: mpsc::Sender<Datagram>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                let datagram = Datagram {
                    from,
                    data: buf[..len].to_vec(),
                };
                if datagram_tx.send(datagram).await.is_err() {
                    debug!("datagram channel closed, stopping receive loop");
                    break;
                }
            }
            Err(e) => {
                // Transient errors (e.g. connection-refused bleed-through)
                // are expected on an unconnected UDP socket.
                warn!(error = %e, "udp receive error");
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn enable_recverr(socket: &UdpSocket) {
    use std::os::fd::AsRawFd;

    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_IP,
            libc::IP_RECVERR,
            &one as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        warn!(
            error = %std::io::Error::last_os_error(),
            "failed to enable IP_RECVERR; PMTU hints unavailable"
        );
    }
}

#[cfg(target_os = "linux")]
fn drain_err_queue(socket: &UdpSocket) -> Vec<IcmpHint> {
    use std::net::{IpAddr, Ipv4Addr};
    use std::os::fd::AsRawFd;

    let fd = socket.as_raw_fd();
    let mut hints = Vec::new();

    loop {
        let mut data = [0u8; 2048];
        let mut control = [0u8; 1024];
        let mut remote: libc::sockaddr_in = unsafe { std::mem::zeroed() };

        let mut iov = libc::iovec {
            iov_base: data.as_mut_ptr().cast(),
            iov_len: data.len(),
        };
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_name = (&mut remote as *mut libc::sockaddr_in).cast();
        msg.msg_namelen = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = control.len();

        let len = unsafe { libc::recvmsg(fd, &mut msg, libc::MSG_ERRQUEUE | libc::MSG_DONTWAIT) };
        if len < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::WouldBlock {
                warn!(error = %err, "failed to read udp error queue");
            }
            break;
        }

        let from = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::from(u32::from_be(remote.sin_addr.s_addr))),
            u16::from_be(remote.sin_port),
        );

        let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
        while !cmsg.is_null() {
            let header = unsafe { &*cmsg };
            if header.cmsg_level == libc::SOL_IP && header.cmsg_type == libc::IP_RECVERR {
                let err = unsafe { &*(libc::CMSG_DATA(cmsg) as *const libc::sock_extended_err) };
                if err.ee_origin == libc::SO_EE_ORIGIN_ICMP {
                    // The offender sockaddr follows the extended error.
                    let offender = unsafe {
                        &*((err as *const libc::sock_extended_err).add(1)
                            as *const libc::sockaddr_in)
                    };
                    if offender.sin_port == 0 {
                        if err.ee_type == 3 && err.ee_code == 4 {
                            hints.push(IcmpHint::FragNeeded {
                                from,
                                mtu: err.ee_info,
                            });
                        } else {
                            hints.push(IcmpHint::Unreachable { from });
                        }
                    }
                }
            }
            cmsg = unsafe { libc::CMSG_NXTHDR(&msg, cmsg) };
        }
    }

    hints
}

// ============================================================================
// Tests
// ============================================================================
