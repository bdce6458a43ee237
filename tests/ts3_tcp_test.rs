//! TS3 driver over a real TCP socket
//!
//! A small emulator listens on loopback, checks the length and CRC of every
//! frame it receives and answers the way the fixture firmware does.

use std::time::Duration;

use instrumentrs::common::TcpIpDevice;
use instrumentrs::config::TcpConfig;
use instrumentrs::platform::next::ts3::frame::checksum_field;
use instrumentrs::platform::next::ts3::{NackReason, Ts3};
use instrumentrs::InstrumentError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Build a frame the way the fixture does.
fn reply(body: &str) -> Vec<u8> {
    let placeholder = format!("$000;{};0000", body);
    format!(
        "${:03};{};{}\r",
        placeholder.len(),
        body,
        checksum_field(placeholder.as_bytes())
    )
    .into_bytes()
}

/// Returns the argument list of a well-formed frame, `None` otherwise.
fn check_frame(frame: &str) -> Option<Vec<String>> {
    let frame = frame.strip_suffix('\r')?;
    let (head, crc) = frame.rsplit_once(';')?;
    let (length, body) = head.strip_prefix('$')?.split_once(';')?;

    let placeholder = format!("$000;{};0000", body);
    if length.parse::<usize>().ok()? != placeholder.len() || frame.len() != placeholder.len() {
        return None;
    }
    if crc != checksum_field(placeholder.as_bytes()) {
        return None;
    }
    Some(body.split(';').map(str::to_string).collect())
}

fn respond(args: &[String]) -> Vec<u8> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["10"] | ["14"] | ["23", _] | ["40", _, _, _] => reply("1"),
        ["13"] => reply("13;3;1;2208"),
        ["15"] => reply("15;70001234;TS3 fixture"),
        ["25"] => reply("25;1"),
        ["27"] => reply("27;1;1"),
        ["41", "0", "2"] => reply("41;1"),
        ["43", _, _, _] => reply("43;2.5"),
        ["82"] => reply("82;operator"),
        ["83", _] => reply("1"),
        ["87", _, _] => reply("2;7"),
        _ => reply("2;1"),
    }
}

async fn serve(mut socket: TcpStream) {
    let mut pending = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        pending.extend_from_slice(&buf[..n]);

        while let Some(end) = pending.iter().position(|&b| b == b'\r') {
            let frame: Vec<u8> = pending.drain(..=end).collect();
            let answer = match check_frame(&String::from_utf8_lossy(&frame)) {
                Some(args) => respond(&args),
                None => reply("2;6"),
            };
            if socket.write_all(&answer).await.is_err() {
                return;
            }
        }
    }
}

async fn emulator() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve(socket));
        }
    });
    port
}

async fn connect() -> Ts3<TcpIpDevice> {
    let port = emulator().await;
    Ts3::new(TcpIpDevice::connect("127.0.0.1", port).await.unwrap())
}

#[tokio::test]
async fn test_emulator_accepts_driver_frames() {
    let mut ts3 = connect().await;
    ts3.poll_device().await.unwrap();
    ts3.set_buzzer(true).await.unwrap();
    ts3.set_dig_output_pin(1, 4, true).await.unwrap();
}

#[tokio::test]
async fn test_queries() {
    let mut ts3 = connect().await;

    assert_eq!(
        ts3.get_version().await.unwrap(),
        ("3.1".to_string(), "2208".to_string())
    );
    assert_eq!(
        ts3.get_product_id().await.unwrap(),
        ("70001234".to_string(), "TS3 fixture".to_string())
    );
    assert!(ts3.get_dut_present().await.unwrap());
    assert_eq!(ts3.get_dut_power().await.unwrap(), (true, true));
    assert!(ts3.get_dig_input_pin(0, 2).await.unwrap());
    assert_eq!(ts3.get_ana_input_pin(0, 1, 0).await.unwrap(), 2.5);
    assert_eq!(ts3.get_user().await.unwrap(), "operator");
}

#[tokio::test]
async fn test_nack_from_fixture() {
    let mut ts3 = connect().await;

    // The emulator refuses to change the fixture id.
    let result = ts3.set_id(1234, 5).await;
    assert!(matches!(
        result,
        Err(InstrumentError::Ts3Nack(NackReason::ParameterCount))
    ));

    // Unknown to the emulator.
    let result = ts3.get_svn().await;
    assert!(matches!(
        result,
        Err(InstrumentError::Ts3Nack(NackReason::UnknownCommand))
    ));

    // The link is still usable afterwards.
    ts3.poll_device().await.unwrap();
}

#[tokio::test]
async fn test_corrupted_frame_is_refused() {
    let port = emulator().await;
    let mut socket = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    socket.write_all(b"$012;10;FFFF\r").await.unwrap();

    let mut buf = [0u8; 64];
    let n = socket.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).starts_with("$013;2;6;"));
}

#[tokio::test]
async fn test_unresponsive_fixture_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(socket);
    });

    let mut config = TcpConfig::new("127.0.0.1", port);
    config.timeout_ms = 50;
    let mut ts3 = Ts3::new(TcpIpDevice::connect_with_config(&config).await.unwrap());
    assert!(matches!(
        ts3.poll_device().await,
        Err(InstrumentError::Timeout(_))
    ));

    server.await.unwrap();
}
