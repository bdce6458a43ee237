//! MX100TP driver against a scripted device
//!
//! Checks the exact bytes each command puts on the wire and how replies
//! are turned into typed values.

use std::net::Ipv4Addr;

use instrumentrs::common::MockDevice;
use instrumentrs::psu::aimtti::{
    Damping, InterfaceLock, MultiAction, Mx100tp, NetConfig, TrackingMode,
};
use instrumentrs::psu::PowerSupply;
use instrumentrs::InstrumentError;

fn psu() -> (Mx100tp<MockDevice>, MockDevice) {
    let mock = MockDevice::new();
    (Mx100tp::new(mock.clone()), mock)
}

#[tokio::test]
async fn test_bench_setup_sequence() {
    let (mut psu, mock) = psu();

    psu.set_channel_voltage(1, 5.0).await.unwrap();
    psu.set_channel_current_limit(1, 0.5).await.unwrap();
    psu.set_channel_over_voltage_protection(1, 5.5).await.unwrap();
    psu.set_channel_current_measurement_averaging(1, Damping::High)
        .await
        .unwrap();
    psu.enable_channel(1).await.unwrap();

    assert_eq!(
        mock.sent_commands(),
        vec!["V1 5\n", "I1 0.5\n", "OVP1 5.5\n", "DAMPING1 HIGH\n", "OP1 1\n"]
    );
}

#[tokio::test]
async fn test_setpoint_queries() {
    let (mut psu, mock) = psu();
    mock.push_response("V2 12.000\r\n");
    mock.push_response("I2 1.500\r\n");
    mock.push_response("VP2 OFF\r\n");
    mock.push_response("CP2 3.300\r\n");

    assert_eq!(psu.get_channel_voltage_setpoint(2).await.unwrap(), 12.0);
    assert_eq!(psu.get_channel_current_limit_setpoint(2).await.unwrap(), 1.5);
    assert_eq!(psu.get_channel_over_voltage_setpoint(2).await.unwrap(), None);
    assert_eq!(psu.get_channel_over_current_setpoint(2).await.unwrap(), Some(3.3));
    assert_eq!(mock.sent_commands(), vec!["V2?\n", "I2?\n", "OVP2?\n", "OCP2?\n"]);
}

#[tokio::test]
async fn test_measurements() {
    let (mut psu, mock) = psu();
    mock.push_response("4.998V\r\n");
    mock.push_response("0.123A\r\n");

    assert_eq!(psu.get_channel_voltage(3).await.unwrap(), 4.998);
    assert_eq!(psu.get_channel_current(3).await.unwrap(), 0.123);
    assert_eq!(mock.sent_commands(), vec!["V3O?\n", "I3O?\n"]);
}

#[tokio::test]
async fn test_store_bounds() {
    let (mut psu, mock) = psu();

    assert!(matches!(
        psu.save_settings(50).await,
        Err(InstrumentError::InvalidArgument(_))
    ));
    assert!(psu.recall_channel_settings(1, 50).await.is_err());
    assert!(mock.sent_commands().is_empty());

    psu.save_settings(49).await.unwrap();
    psu.recall_settings(0).await.unwrap();
    assert_eq!(mock.sent_commands(), vec!["*SAV 49\n", "*RCL 0\n"]);
}

#[tokio::test]
async fn test_channel_bounds() {
    let (mut psu, mock) = psu();
    for channel in [0, 4, 255] {
        assert!(psu.set_channel_voltage(channel, 1.0).await.is_err());
        assert!(psu.get_channel_status(channel).await.is_err());
    }
    assert!(mock.sent_commands().is_empty());
}

#[tokio::test]
async fn test_tracking_and_sequencing() {
    let (mut psu, mock) = psu();
    mock.push_response("2\r\n");
    mock.push_response("OK\r\n");

    psu.set_voltage_tracking_mode(TrackingMode::Mode3).await.unwrap();
    assert_eq!(psu.get_voltage_tracking_mode().await.unwrap(), TrackingMode::Mode2);
    psu.set_channel_on_delay(2, 250).await.unwrap();
    psu.set_channel_on_action(2, MultiAction::Delay).await.unwrap();

    assert_eq!(
        mock.sent_commands(),
        vec!["CONFIG 3\n", "CONFIG?\n", "ONDELAY2 250\n", "ONACTION2 DELAY\n"]
    );
}

#[tokio::test]
async fn test_interface_queries() {
    let (mut psu, mock) = psu();
    mock.push_response("-1\r\n");
    mock.push_response("192.168.0.20\r\n");
    mock.push_response("static\r\n");

    assert_eq!(psu.get_interface_lock().await.unwrap(), InterfaceLock::Unavailable);
    assert_eq!(
        psu.get_ip_address().await.unwrap(),
        Ipv4Addr::new(192, 168, 0, 20)
    );
    assert_eq!(psu.get_netconfig().await.unwrap(), NetConfig::Static);

    psu.set_netmask(Ipv4Addr::new(255, 255, 255, 0)).await.unwrap();
    assert_eq!(mock.last_command().as_deref(), Some("NETMASK 255.255.255.0\n"));
}

#[tokio::test]
async fn test_identify_through_capability_trait() {
    let (psu, mock) = psu();
    mock.push_response("THURLBY THANDAR, MX100TP, 533097, 1.03-1.00-1.02\r\n");

    let mut supply: Box<dyn PowerSupply> = Box::new(psu);
    let idn = supply.identify().await.unwrap();
    assert_eq!(idn, "THURLBY THANDAR, MX100TP, 533097, 1.03-1.00-1.02");
    assert_eq!(mock.sent_commands(), vec!["*IDN?\n"]);
}

#[tokio::test]
async fn test_silent_instrument_times_out() {
    let (mut psu, _mock) = psu();
    assert!(matches!(
        psu.get_status_byte().await,
        Err(InstrumentError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_transport_failure_propagates() {
    let (mut psu, mock) = psu();
    mock.inject_next_failure();
    assert!(matches!(psu.factory_reset().await, Err(InstrumentError::Io(_))));
    psu.factory_reset().await.unwrap();
    assert_eq!(mock.sent_commands(), vec!["*RST\n"]);
}
