mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{heartbeat, stream, SimulatedFcu};
use flightcheck::config::{HarnessConfig, LinkConfig};
use flightcheck::messages::{msg_id, Attitude, LocalPositionNed};
use flightcheck::probes::{default_probes, ProbeEnv};
use flightcheck::runner::{run_isolated, ProbeOutcome, ProbeReport};
use flightcheck::transport::{Frame, LoopbackTransport, TransportAdapter, UdpTransport};

const DEADLINE: Duration = Duration::from_secs(60);

async fn run_with(name: &str, config: HarnessConfig, transport: Arc<dyn TransportAdapter>) -> ProbeReport {
    let env = Arc::new(ProbeEnv::over_mavlink(config, transport));
    let checks = default_probes();
    let check = checks.iter().find(|c| c.name() == name).unwrap();
    run_isolated(check, env, DEADLINE).await
}

async fn run_check(name: &str, transport: &Arc<LoopbackTransport>) -> ProbeReport {
    run_with(name, HarnessConfig::default(), transport.clone()).await
}

fn findings(report: ProbeReport) -> (Vec<String>, Vec<String>) {
    match report.outcome {
        ProbeOutcome::Reported(findings) => (findings.failures, findings.infos),
        other => panic!("expected findings, got {:?}", other),
    }
}

fn attitude(roll_deg: f32, pitch_deg: f32, yawspeed: f32) -> Frame {
    let attitude = Attitude {
        roll: roll_deg.to_radians(),
        pitch: pitch_deg.to_radians(),
        yaw: 0.0,
        rollspeed: 0.0,
        pitchspeed: 0.0,
        yawspeed,
    };
    Frame::new(msg_id::ATTITUDE, attitude.encode())
}

fn heading(yaw_deg: f32) -> Frame {
    let attitude = Attitude {
        roll: 0.0,
        pitch: 0.0,
        yaw: yaw_deg.to_radians(),
        rollspeed: 0.0,
        pitchspeed: 0.0,
        yawspeed: 0.0,
    };
    Frame::new(msg_id::ATTITUDE, attitude.encode())
}

fn put_f32(payload: &mut [u8], offset: usize, value: f32) {
    payload[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn vision(x: f32, y: f32, z: f32, yaw_deg: f32) -> Frame {
    let mut payload = vec![0; 32];
    put_f32(&mut payload, 8, x);
    put_f32(&mut payload, 12, y);
    put_f32(&mut payload, 16, z);
    put_f32(&mut payload, 28, yaw_deg.to_radians());
    Frame::new(msg_id::VISION_POSITION_ESTIMATE, payload)
}

fn mocap(q: [f32; 4], x: f32, y: f32, z: f32) -> Frame {
    let mut payload = vec![0; 36];
    for (i, component) in q.iter().enumerate() {
        put_f32(&mut payload, 8 + 4 * i, *component);
    }
    put_f32(&mut payload, 24, x);
    put_f32(&mut payload, 28, y);
    put_f32(&mut payload, 32, z);
    Frame::new(msg_id::ATT_POS_MOCAP, payload)
}

/// EKF2 set up for vision position and yaw fusion.
fn ekf2_with_vision() -> SimulatedFcu {
    SimulatedFcu::new()
        .int_param("SYS_MC_EST_GROUP", 2)
        .int_param("EKF2_AID_MASK", 0b0001_1000)
        .real_param("EKF2_EV_DELAY", 0.0)
        .real_param("EKF2_EVA_NOISE", 0.1)
        .real_param("EKF2_EVP_NOISE", 0.1)
}

fn local_position(vx: f32, vz: f32) -> Frame {
    let position = LocalPositionNed {
        x: 0.0,
        y: 0.0,
        z: -0.1,
        vx,
        vy: 0.0,
        vz,
    };
    Frame::new(msg_id::LOCAL_POSITION_NED, position.encode())
}

#[tokio::test(start_paused = true)]
async fn test_missing_imu_is_reported() {
    let transport = SimulatedFcu::new().into_transport();

    let report = run_check("IMU", &transport).await;
    let (failures, infos) = findings(report);
    assert_eq!(failures, vec!["no IMU data (check flight controller calibration)"]);
    assert!(infos.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_streaming_imu_is_ok() {
    let transport = SimulatedFcu::new().into_transport();
    let feed = stream(&transport, vec![Frame::new(msg_id::HIGHRES_IMU, vec![0; 62])]);

    let report = run_check("IMU", &transport).await;
    feed.abort();
    assert!(report.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_fcu_with_lpe_estimator() {
    let transport = SimulatedFcu::new()
        .command("ver all", "HW arch: PX4_FMU_V4\nFW version: v1.9.0-clever\nOS: NuttX")
        .int_param("SYS_MC_EST_GROUP", 1)
        .int_param("LPE_FUSION", 0b1001_0110)
        .into_transport();
    let feed = stream(&transport, vec![heartbeat()]);

    let report = run_check("FCU", &transport).await;
    feed.abort();
    let (failures, infos) = findings(report);
    assert!(failures.is_empty(), "unexpected failures {:?}", failures);
    assert_eq!(
        infos,
        vec![
            "firmware version: v1.9.0-clever",
            "selected estimator: LPE",
            "LPE_FUSION: land detector fusion is enabled",
            "LPE_FUSION: barometer fusion is enabled",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_fcu_unknown_estimator_and_stock_firmware() {
    let transport = SimulatedFcu::new()
        .command("ver all", "FW version: v1.9.0")
        .int_param("SYS_MC_EST_GROUP", 3)
        .into_transport();
    let feed = stream(&transport, vec![heartbeat()]);

    let report = run_check("FCU", &transport).await;
    feed.abort();
    let (failures, _) = findings(report);
    assert_eq!(
        failures,
        vec!["not running clever PX4 firmware", "unknown selected estimator: 3"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_heartbeat_means_no_fcu() {
    let transport = SimulatedFcu::new().into_transport();

    let report = run_check("FCU", &transport).await;
    let (failures, _) = findings(report);
    assert_eq!(failures, vec!["no connection to the FCU (check wiring)"]);
    assert!(transport.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_preflight_problems_are_reported() {
    let transport = SimulatedFcu::new()
        .command(
            "commander check",
            "WARN  [commander] Preflight Fail: Accel Sensor 0 missing\nPreflight check: FAILED\nPrearm check: OK",
        )
        .into_transport();

    let report = run_check("Preflight status", &transport).await;
    let (failures, _) = findings(report);
    assert_eq!(
        failures,
        vec!["Preflight Fail: Accel Sensor 0 missing", "Preflight check: FAILED"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_silent_console_means_no_preflight_data() {
    let transport = LoopbackTransport::new();

    let report = run_check("Preflight status", &transport).await;
    let (failures, _) = findings(report);
    assert_eq!(failures, vec!["no data from FCU"]);
}

#[tokio::test]
async fn test_unconnected_link_means_no_preflight_data() {
    let link = LinkConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        remote: None,
        ..LinkConfig::default()
    };
    let transport = UdpTransport::bind(&link).await.unwrap();

    let report = run_with("Preflight status", HarnessConfig::default(), transport).await;
    let (failures, _) = findings(report);
    assert_eq!(failures, vec!["no data from FCU"]);
}

#[tokio::test(start_paused = true)]
async fn test_tilted_copter_is_reported() {
    let transport = SimulatedFcu::new().into_transport();
    let feed = stream(&transport, vec![local_position(0.0, 0.0), attitude(0.5, 5.0, 0.0)]);

    let report = run_check("Local position", &transport).await;
    feed.abort();
    let (failures, _) = findings(report);
    assert_eq!(
        failures,
        vec!["pitch is 5.00 deg; place copter horizontally or redo level horizon calib"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_moving_estimate_is_reported() {
    let transport = SimulatedFcu::new().into_transport();
    let feed = stream(&transport, vec![local_position(0.5, 0.0), attitude(0.0, 0.0, 0.25)]);

    let report = run_check("Velocity estimation", &transport).await;
    feed.abort();
    let (failures, _) = findings(report);
    assert_eq!(failures.len(), 2);
    assert!(failures[0].starts_with("horizontal velocity estimation is 0.50 m/s"));
    assert!(failures[1].starts_with("yaw rate estimation is 0.25 rad/s"));
}

#[tokio::test(start_paused = true)]
async fn test_optical_flow_with_ekf2() {
    let transport = SimulatedFcu::new()
        .int_param("SENS_FLOW_ROT", 0)
        .int_param("SYS_MC_EST_GROUP", 2)
        .int_param("EKF2_AID_MASK", 0b0001_1000)
        .real_param("EKF2_OF_DELAY", 0.0)
        .int_param("EKF2_OF_QMIN", 10)
        .real_param("EKF2_OF_N_MIN", 0.15)
        .real_param("EKF2_OF_N_MAX", 0.5)
        .real_param("SENS_FLOW_MINHGT", 0.0)
        .real_param("SENS_FLOW_MAXHGT", 4.0)
        .into_transport();
    let feed = stream(&transport, vec![Frame::new(msg_id::OPTICAL_FLOW_RAD, vec![0; 44])]);

    let report = run_check("Optical flow", &transport).await;
    feed.abort();
    let (failures, infos) = findings(report);
    assert_eq!(failures, vec!["optical flow fusion is disabled, change EKF2_AID_MASK parameter"]);
    assert_eq!(infos.len(), 1);
    assert!(infos[0].starts_with("EKF2_OF_QMIN is 10"));
}

#[tokio::test(start_paused = true)]
async fn test_optical_flow_with_lpe_misconfigured() {
    let transport = SimulatedFcu::new()
        .int_param("SENS_FLOW_ROT", 0)
        .int_param("SYS_MC_EST_GROUP", 1)
        .int_param("LPE_FUSION", 0)
        .real_param("LPE_FLW_SCALE", 1.3)
        .int_param("LPE_FLW_QMIN", 10)
        .real_param("LPE_FLW_R", 0.2)
        .real_param("LPE_FLW_RR", 0.0)
        .real_param("SENS_FLOW_MINHGT", 0.7)
        .real_param("SENS_FLOW_MAXHGT", 3.0)
        .into_transport();
    let feed = stream(&transport, vec![Frame::new(msg_id::OPTICAL_FLOW_RAD, vec![0; 44])]);

    let report = run_check("Optical flow", &transport).await;
    feed.abort();
    let (failures, infos) = findings(report);
    assert_eq!(
        failures,
        vec![
            "optical flow fusion is disabled, change LPE_FUSION parameter",
            "flow gyro compensation is disabled, change LPE_FUSION parameter",
            "LPE_FLW_SCALE parameter is 1.30, but it should be 1.0",
        ]
    );
    assert_eq!(infos.len(), 1);
    assert!(infos[0].starts_with("LPE_FLW_QMIN is 10, LPE_FLW_R is 0.2000"));
}

#[tokio::test(start_paused = true)]
async fn test_optical_flow_with_lpe_ok() {
    let transport = SimulatedFcu::new()
        .int_param("SENS_FLOW_ROT", 0)
        .int_param("SYS_MC_EST_GROUP", 1)
        .int_param("LPE_FUSION", 0b0100_0010)
        .real_param("LPE_FLW_SCALE", 1.0)
        .int_param("LPE_FLW_QMIN", 10)
        .real_param("LPE_FLW_R", 0.2)
        .real_param("LPE_FLW_RR", 0.0)
        .real_param("SENS_FLOW_MINHGT", 0.7)
        .real_param("SENS_FLOW_MAXHGT", 3.0)
        .into_transport();
    let feed = stream(&transport, vec![Frame::new(msg_id::OPTICAL_FLOW_RAD, vec![0; 44])]);

    let report = run_check("Optical flow", &transport).await;
    feed.abort();
    let (failures, infos) = findings(report);
    assert!(failures.is_empty(), "unexpected failures {:?}", failures);
    assert_eq!(infos.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rangefinder_with_lpe_flat_surface() {
    let transport = SimulatedFcu::new()
        .int_param("SYS_MC_EST_GROUP", 1)
        .int_param("LPE_FUSION", 0b0010_0000)
        .into_transport();
    let feed = stream(&transport, vec![Frame::new(msg_id::DISTANCE_SENSOR, vec![0; 14])]);

    let report = run_check("Rangefinder", &transport).await;
    feed.abort();
    let (failures, infos) = findings(report);
    assert!(failures.is_empty(), "unexpected failures {:?}", failures);
    assert_eq!(
        infos,
        vec!["\"pub agl as lpos down\" in LPE_FUSION is enabled, operating over flat surface"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rangefinder_with_ekf2_height_source() {
    let transport = SimulatedFcu::new()
        .int_param("SYS_MC_EST_GROUP", 2)
        .int_param("EKF2_HGT_MODE", 2)
        .int_param("EKF2_RNG_AID", 0)
        .into_transport();
    let feed = stream(&transport, vec![Frame::new(msg_id::DISTANCE_SENSOR, vec![0; 14])]);

    let report = run_check("Rangefinder", &transport).await;
    feed.abort();
    let (failures, infos) = findings(report);
    assert!(failures.is_empty(), "unexpected failures {:?}", failures);
    assert_eq!(
        infos,
        vec![
            "EKF2_HGT_MODE = Range sensor, operating over flat surface",
            "EKF2_RNG_AID != 1, range aid is disabled",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_rangefinder_is_reported() {
    let transport = SimulatedFcu::new().int_param("SYS_MC_EST_GROUP", 2).into_transport();

    let report = run_check("Rangefinder", &transport).await;
    let (failures, infos) = findings(report);
    assert_eq!(failures, vec!["no rangefinder data"]);
    assert!(infos.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_vision_disagreeing_with_estimate() {
    let transport = ekf2_with_vision().into_transport();
    let feed = stream(
        &transport,
        vec![vision(1.0, 0.0, -0.9, 20.0), local_position(0.0, 0.0), heading(0.0)],
    );

    let report = run_check("Vision position estimate", &transport).await;
    feed.abort();
    let (failures, infos) = findings(report);
    assert_eq!(
        failures,
        vec![
            "horizontal position inconsistency: 1.00 m",
            "vertical position inconsistency: 0.80 m",
            "yaw inconsistency: -20.00 deg",
        ]
    );
    assert_eq!(infos, vec!["EKF2_EVA_NOISE is 0.100, EKF2_EVP_NOISE is 0.100"]);
}

#[tokio::test(start_paused = true)]
async fn test_vision_yaw_across_the_wrap() {
    let transport = ekf2_with_vision().into_transport();
    let feed = stream(
        &transport,
        vec![vision(0.0, 0.0, -0.1, 179.0), local_position(0.0, 0.0), heading(-179.0)],
    );

    let report = run_check("Vision position estimate", &transport).await;
    feed.abort();
    let (failures, _) = findings(report);
    assert!(failures.is_empty(), "unexpected failures {:?}", failures);
}

#[tokio::test(start_paused = true)]
async fn test_mocap_used_without_vision_estimate() {
    let half = std::f32::consts::FRAC_PI_4;
    let transport = ekf2_with_vision().into_transport();
    let feed = stream(
        &transport,
        vec![
            // facing east
            mocap([half.cos(), 0.0, 0.0, half.sin()], 2.0, 0.0, -0.1),
            local_position(0.0, 0.0),
            heading(90.0),
        ],
    );

    let report = run_check("Vision position estimate", &transport).await;
    feed.abort();
    let (failures, _) = findings(report);
    assert_eq!(failures, vec!["horizontal position inconsistency: 2.00 m"]);
}

#[tokio::test]
async fn test_no_vision_and_no_publisher() {
    let transport = ekf2_with_vision().into_transport();
    let mut config = HarnessConfig::default();
    config.host.vpe_publisher = "no_such_vpe".to_string();

    let report = run_with("Vision position estimate", config, transport.clone()).await;
    let (failures, infos) = findings(report);
    assert_eq!(failures, vec!["no VPE or MoCap messages"]);
    assert!(infos.is_empty());
    // estimator parameters are not read
    assert!(transport.published().is_empty());
}
