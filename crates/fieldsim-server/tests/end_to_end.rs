//! Wire-level scenarios: a simulated master talks to the runtime over an
//! in-memory duplex standing in for the serial port.

use fieldsim_device::profile::{DeviceKind, SimMode};
use fieldsim_server::{spawn, ServerHandle, StatePaths};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

async fn attach_master(handle: &ServerHandle) -> DuplexStream {
    let (master, slave_side) = tokio::io::duplex(1024);
    handle.attach(Box::new(slave_side)).await.unwrap();
    master
}

async fn exchange(master: &mut DuplexStream, request: &[u8], response_len: usize) -> Vec<u8> {
    master.write_all(request).await.unwrap();
    let mut response = vec![0u8; response_len];
    timeout(Duration::from_secs(2), master.read_exact(&mut response))
        .await
        .expect("timed out waiting for response")
        .unwrap();
    response
}

#[tokio::test]
async fn default_roster_answers_reads() {
    let handle = spawn(None);
    let mut master = attach_master(&handle).await;

    // Slave 1 is a default inverter: frequency 5000 at 0x3000, 0 at 0x3001.
    let response = exchange(
        &mut master,
        &[0x01, 0x03, 0x30, 0x00, 0x00, 0x02, 0xCB, 0x0B],
        9,
    )
    .await;
    assert_eq!(response, [0x01, 0x03, 0x04, 0x13, 0x88, 0x00, 0x00, 0x7E, 0x9D]);

    // Slave 110 is a default flow meter: unit code 0x0403 at register 774.
    let response = exchange(
        &mut master,
        &[0x6E, 0x03, 0x03, 0x06, 0x00, 0x01, 0x6D, 0x10],
        7,
    )
    .await;
    assert_eq!(response, [0x6E, 0x03, 0x02, 0x04, 0x03, 0x2E, 0x8C]);
}

#[tokio::test]
async fn run_command_echoes_then_changes_telemetry() {
    let handle = spawn(None);
    let mut master = attach_master(&handle).await;

    let request = [0x01, 0x06, 0x20, 0x00, 0x00, 0x01, 0x43, 0xCA];
    let response = exchange(&mut master, &request, 8).await;
    assert_eq!(response, request);

    let response = exchange(
        &mut master,
        &[0x01, 0x03, 0x30, 0x00, 0x00, 0x01, 0x8B, 0x0A],
        7,
    )
    .await;
    assert_eq!(response, [0x01, 0x03, 0x02, 0x03, 0xE8, 0xB8, 0xFA]);
}

#[tokio::test]
async fn read_only_write_gets_an_exception() {
    let handle = spawn(None);
    let mut master = attach_master(&handle).await;

    let response = exchange(
        &mut master,
        &[0x01, 0x06, 0x30, 0x00, 0x00, 0xFF, 0xC6, 0x8A],
        5,
    )
    .await;
    assert_eq!(response, [0x01, 0x86, 0x02, 0xC3, 0xA1]);
}

#[tokio::test]
async fn disabled_slave_stays_silent() {
    let handle = spawn(None);
    let mut master = attach_master(&handle).await;
    handle.set_enabled(2, false).await.unwrap();

    master
        .write_all(&[0x02, 0x03, 0x30, 0x00, 0x00, 0x01, 0x8B, 0x39])
        .await
        .unwrap();
    let mut byte = [0u8; 1];
    let silence = timeout(Duration::from_millis(300), master.read_exact(&mut byte)).await;
    assert!(silence.is_err(), "disabled slave must produce no bytes");

    // Re-enabling brings it back without a restart.
    handle.set_enabled(2, true).await.unwrap();
    let response = exchange(
        &mut master,
        &[0x02, 0x03, 0x30, 0x00, 0x00, 0x01, 0x8B, 0x39],
        7,
    )
    .await;
    assert_eq!(response[..2], [0x02, 0x03]);
}

#[tokio::test]
async fn block_write_rejection_leaves_registers_alone() {
    let handle = spawn(None);
    let mut master = attach_master(&handle).await;

    // 0x20FF is writable but 0x2100 is read-only; the batch dies whole.
    let response = exchange(
        &mut master,
        &[
            0x01, 0x10, 0x20, 0xFF, 0x00, 0x02, 0x04, 0x00, 0x01, 0x00, 0x05, 0xB4, 0xA9,
        ],
        5,
    )
    .await;
    assert_eq!(response, [0x01, 0x90, 0x02, 0xCD, 0xC1]);

    let response = exchange(
        &mut master,
        &[0x01, 0x03, 0x20, 0xFF, 0x00, 0x02, 0xFF, 0xFB],
        9,
    )
    .await;
    assert_eq!(response, [0x01, 0x03, 0x04, 0x00, 0x00, 0x00, 0x00, 0xFA, 0x33]);
}

#[tokio::test]
async fn noise_between_frames_is_tolerated() {
    let handle = spawn(None);
    let mut master = attach_master(&handle).await;

    let mut stream = vec![0xDE, 0xAD, 0xBE, 0xEF];
    stream.extend_from_slice(&[0x01, 0x03, 0x30, 0x00, 0x00, 0x02, 0xCB, 0x0B]);
    master.write_all(&stream).await.unwrap();

    let mut response = [0u8; 9];
    timeout(Duration::from_secs(2), master.read_exact(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response[..3], [0x01, 0x03, 0x04]);
}

#[tokio::test]
async fn operator_surface_manages_the_roster() {
    let handle = spawn(None);

    let info = handle.add_device(42, DeviceKind::EnergyMeter).await.unwrap();
    assert!(info.enabled);
    assert_eq!(info.sim_mode, SimMode::Random);

    // Duplicate add surfaces the registry error through the handle.
    assert!(handle.add_device(42, DeviceKind::Inverter).await.is_err());

    handle.set_sim_mode(42, SimMode::Manual).await.unwrap();
    let state = handle.device_state(42).await.unwrap();
    assert_eq!(state.sim_mode, SimMode::Manual);
    assert_eq!(state.kind, DeviceKind::EnergyMeter);

    // Default power-factor register reads back through the handle.
    assert_eq!(handle.get_register(42, 0x082E).await.unwrap(), 0x3F80);

    handle.remove_device(42).await.unwrap();
    assert!(handle.device_state(42).await.is_err());

    let ids: Vec<u8> = handle
        .list_devices()
        .await
        .unwrap()
        .iter()
        .map(|d| d.unit_id)
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 110, 111]);
}

#[tokio::test]
async fn state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let paths = StatePaths::in_dir(dir.path());

    {
        let handle = spawn(Some(paths.clone()));
        handle.add_device(42, DeviceKind::EnergyMeter).await.unwrap();
        handle.set_enabled(3, false).await.unwrap();
        handle.set_register(42, 0x0100, 77).await.unwrap();
        handle.set_register(1, 0x2001, 250).await.unwrap();
        handle.stop().await.unwrap();
    }

    let handle = spawn(Some(paths));
    let ids: Vec<u8> = handle
        .list_devices()
        .await
        .unwrap()
        .iter()
        .map(|d| d.unit_id)
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 42, 110, 111]);

    assert!(!handle.device_state(3).await.unwrap().enabled);
    assert_eq!(handle.get_register(42, 0x0100).await.unwrap(), 77);
    assert_eq!(handle.get_register(1, 0x2001).await.unwrap(), 250);
    // Factory defaults for untouched registers are intact after reload.
    assert_eq!(handle.get_register(1, 0x3000).await.unwrap(), 5000);
}

#[tokio::test]
async fn stop_discards_inflight_assembly() {
    let handle = spawn(None);
    let mut master = attach_master(&handle).await;

    // Send half a frame, stop, reattach, send the other half: the halves
    // must not be stitched together across the stop.
    master
        .write_all(&[0x01, 0x03, 0x30, 0x00])
        .await
        .unwrap();
    // Give the server a chance to consume the partial frame first.
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop().await.unwrap();

    let mut master = attach_master(&handle).await;
    master.write_all(&[0x00, 0x02, 0xCB, 0x0B]).await.unwrap();
    let mut byte = [0u8; 1];
    let silence = timeout(Duration::from_millis(300), master.read_exact(&mut byte)).await;
    assert!(silence.is_err());

    // A whole frame still works on the new link.
    let response = exchange(
        &mut master,
        &[0x01, 0x03, 0x30, 0x00, 0x00, 0x02, 0xCB, 0x0B],
        9,
    )
    .await;
    assert_eq!(response[..3], [0x01, 0x03, 0x04]);
}
