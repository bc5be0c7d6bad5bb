//! The alternate receive path (spec.md §9 "alternate receive path"): an optional raw-capture
//! source, equivalent to a batch of `(payload, from-addr)` tuples, as an alternative to a
//! socket's own `recv_from`.
//!
//! Grounded on `other_examples/.../yaleman-goatns`, which depends on the real `pcap` crate for
//! exactly this kind of capture-based packet ingestion. Disabled by default; with the `pcap`
//! feature off, [`NoopReceiver`] is used and the engine's alternate-recv dispatch branch is
//! simply never reached (there's nothing registered with the poller to make it ready).

use std::net::SocketAddr;

/// A batch-oriented alternative to reading one datagram at a time off a query socket.
pub trait AltReceiver {
	/// Drains whatever is currently available, invoking `on_packet` once per `(from, payload)`.
	fn drain(&mut self, on_packet: &mut dyn FnMut(SocketAddr, &[u8]));

	/// Registers this receiver's readiness fd with the poller, if it has one. `NoopReceiver`
	/// registers nothing, so its recv-ready dispatch branch is simply never reached.
	fn register(&self, poller: &mut runtime::Poller) -> Option<runtime::Token> {
		let _ = poller;
		None
	}
}

/// The default when the `pcap` feature is off: registers nothing, yields nothing.
#[derive(Default)]
pub struct NoopReceiver;

impl AltReceiver for NoopReceiver {
	fn drain(&mut self, _on_packet: &mut dyn FnMut(SocketAddr, &[u8])) {}
}

#[cfg(feature = "pcap")]
pub use capture::PcapReceiver;

#[cfg(feature = "pcap")]
mod capture {
	use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

	use pcap::{Active, Capture};

	use super::AltReceiver;

	/// Reads raw UDP/IP frames off a live capture handle and hands the UDP payload and source
	/// address to the engine, bypassing the kernel socket recv path entirely.
	pub struct PcapReceiver {
		capture: Capture<Active>,
	}

	impl PcapReceiver {
		pub fn open(device: &str) -> Result<Self, pcap::Error> {
			let capture = Capture::from_device(device)?.immediate_mode(true).open()?;
			Ok(Self { capture })
		}
	}

	impl AltReceiver for PcapReceiver {
		fn drain(&mut self, on_packet: &mut dyn FnMut(SocketAddr, &[u8])) {
			while let Ok(packet) = self.capture.next_packet() {
				if let Some((src, payload)) = parse_udp_frame(packet.data) {
					on_packet(src, payload);
				}
			}
		}

		fn register(&self, poller: &mut runtime::Poller) -> Option<runtime::Token> {
			Some(poller.register(&self.capture, runtime::Interest::READ))
		}
	}

	/// Pulls the UDP payload and source `(ip, port)` out of a raw Ethernet frame carrying
	/// IPv4 or IPv6 + UDP. Anything else (ARP, TCP, fragmented IP) is ignored.
	fn parse_udp_frame(frame: &[u8]) -> Option<(SocketAddr, &[u8])> {
		const ETH_HEADER_LEN: usize = 14;
		const ETHERTYPE_IPV4: u16 = 0x0800;
		const ETHERTYPE_IPV6: u16 = 0x86DD;
		const UDP_HEADER_LEN: usize = 8;

		let ethertype = u16::from_be_bytes(frame.get(12..14)?.try_into().ok()?);
		let ip_start = ETH_HEADER_LEN;

		let (src_ip, proto, udp_start): (IpAddr, u8, usize) = match ethertype {
			ETHERTYPE_IPV4 => {
				let ihl = (*frame.get(ip_start)? & 0x0F) as usize * 4;
				let proto = *frame.get(ip_start + 9)?;
				let src: [u8; 4] = frame.get(ip_start + 12..ip_start + 16)?.try_into().ok()?;
				(IpAddr::V4(Ipv4Addr::from(src)), proto, ip_start + ihl)
			}
			ETHERTYPE_IPV6 => {
				let proto = *frame.get(ip_start + 6)?;
				let src: [u8; 16] = frame.get(ip_start + 8..ip_start + 24)?.try_into().ok()?;
				(IpAddr::V6(Ipv6Addr::from(src)), proto, ip_start + 40)
			}
			_ => return None,
		};

		const PROTO_UDP: u8 = 17;

		if proto != PROTO_UDP {
			return None;
		}

		let src_port = u16::from_be_bytes(frame.get(udp_start..udp_start + 2)?.try_into().ok()?);
		let payload = frame.get(udp_start + UDP_HEADER_LEN..)?;

		Some((SocketAddr::new(src_ip, src_port), payload))
	}
}
