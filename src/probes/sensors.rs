//! Sensor and state estimation checks.
//!
//! Each check waits for the relevant telemetry, then looks at the estimator
//! parameters that decide whether the FCU actually uses it.

use std::sync::Arc;
use std::time::Duration;

use crate::diagnostics::DiagnosticContext;
use crate::host;
use crate::messages::{msg_id, Attitude, LocalPositionNed, VisionPose};
use crate::probes::{Estimator, ProbeEnv};
use crate::runner::ProbeResult;

const SENSOR_TIMEOUT: Duration = Duration::from_secs(1);
const FLOW_TIMEOUT: Duration = Duration::from_millis(500);
const RANGE_TIMEOUT: Duration = Duration::from_secs(4);

/// Angle difference in degrees, wrapped to [-180, 180).
fn wrap_degrees(angle: f64) -> f64 {
    (angle + 180.0).rem_euclid(360.0) - 180.0
}

pub async fn check_imu(env: Arc<ProbeEnv>, ctx: DiagnosticContext) -> ProbeResult {
    let imu = env
        .watch
        .next_of(&[msg_id::HIGHRES_IMU, msg_id::SCALED_IMU], SENSOR_TIMEOUT)
        .await;
    if imu.is_none() {
        ctx.failure("no IMU data (check flight controller calibration)");
    }
    Ok(())
}

pub async fn check_local_position(env: Arc<ProbeEnv>, ctx: DiagnosticContext) -> ProbeResult {
    if env.watch.next(msg_id::LOCAL_POSITION_NED, SENSOR_TIMEOUT).await.is_none() {
        ctx.failure("no local position");
        return Ok(());
    }

    let Some(attitude) = env.watch.next_decoded(msg_id::ATTITUDE, SENSOR_TIMEOUT, Attitude::decode).await else {
        ctx.failure("no attitude");
        return Ok(());
    };

    let limit = env.config.limits.max_tilt_deg;
    let pitch = f64::from(attitude.pitch).to_degrees();
    if pitch.abs() > limit {
        ctx.failure(format_args!(
            "pitch is {:.2} deg; place copter horizontally or redo level horizon calib",
            pitch
        ));
    }
    let roll = f64::from(attitude.roll).to_degrees();
    if roll.abs() > limit {
        ctx.failure(format_args!(
            "roll is {:.2} deg; place copter horizontally or redo level horizon calib",
            roll
        ));
    }
    Ok(())
}

pub async fn check_velocity(env: Arc<ProbeEnv>, ctx: DiagnosticContext) -> ProbeResult {
    let Some(position) = env
        .watch
        .next_decoded(msg_id::LOCAL_POSITION_NED, SENSOR_TIMEOUT, LocalPositionNed::decode)
        .await
    else {
        ctx.failure("no velocity estimation");
        return Ok(());
    };

    let limits = &env.config.limits;
    let horizontal = f64::from(position.vx).hypot(f64::from(position.vy));
    let vertical = f64::from(position.vz);
    if horizontal > limits.max_linear_velocity {
        ctx.failure(format_args!(
            "horizontal velocity estimation is {:.2} m/s; is copter staying still?",
            horizontal
        ));
    }
    if vertical.abs() > limits.max_linear_velocity {
        ctx.failure(format_args!(
            "vertical velocity estimation is {:.2} m/s; is copter staying still?",
            vertical
        ));
    }

    let Some(attitude) = env.watch.next_decoded(msg_id::ATTITUDE, SENSOR_TIMEOUT, Attitude::decode).await else {
        ctx.failure("no angular velocity estimation");
        return Ok(());
    };
    let rates = [
        ("roll", attitude.rollspeed),
        ("pitch", attitude.pitchspeed),
        ("yaw", attitude.yawspeed),
    ];
    for (axis, rate) in rates {
        let rate = f64::from(rate);
        if rate.abs() > limits.max_angular_velocity {
            ctx.failure(format_args!(
                "{} rate estimation is {:.2} rad/s ({:.2} deg/s); is copter staying still?",
                axis,
                rate,
                rate.to_degrees()
            ));
        }
    }
    Ok(())
}

pub async fn check_global_position(env: Arc<ProbeEnv>, ctx: DiagnosticContext) -> ProbeResult {
    if env.watch.next(msg_id::GLOBAL_POSITION_INT, SENSOR_TIMEOUT).await.is_none() {
        ctx.failure("no global position");
    }
    Ok(())
}

pub async fn check_optical_flow(env: Arc<ProbeEnv>, ctx: DiagnosticContext) -> ProbeResult {
    if env.watch.next(msg_id::OPTICAL_FLOW_RAD, FLOW_TIMEOUT).await.is_none() {
        ctx.failure("no optical flow data");
        return Ok(());
    }

    if let Some(rotation) = env.param(&ctx, "SENS_FLOW_ROT").await {
        if !rotation.is_zero() {
            ctx.failure(format_args!("SENS_FLOW_ROT parameter is {}, but it should be zero", rotation));
        }
    }

    match env.estimator(&ctx).await {
        Some(Estimator::Lpe) => {
            if let Some(fusion) = env.param(&ctx, "LPE_FUSION").await {
                if !fusion.has_bit(1) {
                    ctx.failure("optical flow fusion is disabled, change LPE_FUSION parameter");
                }
                if !fusion.has_bit(6) {
                    ctx.failure("flow gyro compensation is disabled, change LPE_FUSION parameter");
                }
            }
            if let Some(scale) = env.param(&ctx, "LPE_FLW_SCALE").await {
                if (scale.as_f64() - 1.0).abs() > 1e-3 {
                    ctx.failure(format_args!("LPE_FLW_SCALE parameter is {:.2}, but it should be 1.0", scale));
                }
            }
            let tuning = ["LPE_FLW_QMIN", "LPE_FLW_R", "LPE_FLW_RR", "SENS_FLOW_MINHGT", "SENS_FLOW_MAXHGT"];
            if let Some([qmin, r, rr, min_height, max_height]) = env.params(&ctx, tuning).await {
                ctx.info(format_args!(
                    "LPE_FLW_QMIN is {}, LPE_FLW_R is {:.4}, LPE_FLW_RR is {:.4}, \
                     SENS_FLOW_MINHGT is {:.3}, SENS_FLOW_MAXHGT is {:.3}",
                    qmin, r, rr, min_height, max_height
                ));
            }
        }
        Some(Estimator::Ekf2) => {
            if let Some(mask) = env.param(&ctx, "EKF2_AID_MASK").await {
                if !mask.has_bit(1) {
                    ctx.failure("optical flow fusion is disabled, change EKF2_AID_MASK parameter");
                }
            }
            if let Some(delay) = env.param(&ctx, "EKF2_OF_DELAY").await {
                if !delay.is_zero() {
                    ctx.failure(format_args!("EKF2_OF_DELAY is {:.2}, but it should be zero", delay));
                }
            }
            let tuning = ["EKF2_OF_QMIN", "EKF2_OF_N_MIN", "EKF2_OF_N_MAX", "SENS_FLOW_MINHGT", "SENS_FLOW_MAXHGT"];
            if let Some([qmin, n_min, n_max, min_height, max_height]) = env.params(&ctx, tuning).await {
                ctx.info(format_args!(
                    "EKF2_OF_QMIN is {}, EKF2_OF_N_MIN is {:.4}, EKF2_OF_N_MAX is {:.4}, \
                     SENS_FLOW_MINHGT is {:.3}, SENS_FLOW_MAXHGT is {:.3}",
                    qmin, n_min, n_max, min_height, max_height
                ));
            }
        }
        // the FCU probe reports an unknown estimator
        Some(Estimator::Unknown(_)) | None => {}
    }
    Ok(())
}

async fn vision_sample(env: &ProbeEnv) -> Option<VisionPose> {
    let vision = env
        .watch
        .next_decoded(msg_id::VISION_POSITION_ESTIMATE, SENSOR_TIMEOUT, VisionPose::decode_vision)
        .await;
    match vision {
        Some(pose) => Some(pose),
        None => {
            env.watch
                .next_decoded(msg_id::ATT_POS_MOCAP, SENSOR_TIMEOUT, VisionPose::decode_mocap)
                .await
        }
    }
}

pub async fn check_vpe(env: Arc<ProbeEnv>, ctx: DiagnosticContext) -> ProbeResult {
    let vision = vision_sample(&env).await;
    if vision.is_none() {
        ctx.failure("no VPE or MoCap messages");
        // without a publisher there is nothing more to look at
        if !host::is_process_running(&env.config.host.vpe_publisher).await? {
            return Ok(());
        }
    }

    match env.estimator(&ctx).await {
        Some(Estimator::Lpe) => {
            if let Some(mode) = env.param(&ctx, "ATT_EXT_HDG_M").await {
                if mode.as_i64() != 1 {
                    ctx.failure("vision yaw is disabled, change ATT_EXT_HDG_M parameter");
                }
            }
            if let Some(weight) = env.param(&ctx, "ATT_W_EXT_HDG").await {
                if weight.is_zero() {
                    ctx.failure("vision yaw weight is zero, change ATT_W_EXT_HDG parameter");
                } else {
                    ctx.info(format_args!("vision yaw weight: {:.2}", weight));
                }
            }
            if let Some(fusion) = env.param(&ctx, "LPE_FUSION").await {
                if !fusion.has_bit(2) {
                    ctx.failure("vision position fusion is disabled, change LPE_FUSION parameter");
                }
            }
            if let Some(delay) = env.param(&ctx, "LPE_VIS_DELAY").await {
                if !delay.is_zero() {
                    ctx.failure(format_args!("LPE_VIS_DELAY parameter is {}, but it should be zero", delay));
                }
            }
            if let Some([xy, z]) = env.params(&ctx, ["LPE_VIS_XY", "LPE_VIS_Z"]).await {
                ctx.info(format_args!("LPE_VIS_XY is {:.2} m, LPE_VIS_Z is {:.2} m", xy, z));
            }
        }
        Some(Estimator::Ekf2) => {
            if let Some(mask) = env.param(&ctx, "EKF2_AID_MASK").await {
                if !mask.has_bit(3) {
                    ctx.failure("vision position fusion is disabled, change EKF2_AID_MASK parameter");
                }
                if !mask.has_bit(4) {
                    ctx.failure("vision yaw fusion is disabled, change EKF2_AID_MASK parameter");
                }
            }
            if let Some(delay) = env.param(&ctx, "EKF2_EV_DELAY").await {
                if !delay.is_zero() {
                    ctx.failure(format_args!("EKF2_EV_DELAY is {:.2}, but it should be zero", delay));
                }
            }
            if let Some([angle, position]) = env.params(&ctx, ["EKF2_EVA_NOISE", "EKF2_EVP_NOISE"]).await {
                ctx.info(format_args!(
                    "EKF2_EVA_NOISE is {:.3}, EKF2_EVP_NOISE is {:.3}",
                    angle, position
                ));
            }
        }
        Some(Estimator::Unknown(_)) | None => {}
    }

    let Some(vision) = vision else {
        return Ok(());
    };
    let Some(position) = env
        .watch
        .next_decoded(msg_id::LOCAL_POSITION_NED, SENSOR_TIMEOUT, LocalPositionNed::decode)
        .await
    else {
        return Ok(());
    };

    let limits = &env.config.limits;
    let horizontal = f64::from(position.x - vision.x).hypot(f64::from(position.y - vision.y));
    if horizontal > limits.max_position_mismatch {
        ctx.failure(format_args!("horizontal position inconsistency: {:.2} m", horizontal));
    }
    let vertical = f64::from(position.z - vision.z);
    if vertical.abs() > limits.max_position_mismatch {
        ctx.failure(format_args!("vertical position inconsistency: {:.2} m", vertical));
    }

    if let Some(attitude) = env.watch.next_decoded(msg_id::ATTITUDE, SENSOR_TIMEOUT, Attitude::decode).await {
        let yaw = wrap_degrees(f64::from(attitude.yaw - vision.yaw).to_degrees());
        if yaw.abs() > limits.max_yaw_mismatch_deg {
            ctx.failure(format_args!("yaw inconsistency: {:.2} deg", yaw));
        }
    }
    Ok(())
}

pub async fn check_rangefinder(env: Arc<ProbeEnv>, ctx: DiagnosticContext) -> ProbeResult {
    if env.watch.next(msg_id::DISTANCE_SENSOR, RANGE_TIMEOUT).await.is_none() {
        ctx.failure("no rangefinder data");
        return Ok(());
    }

    match env.estimator(&ctx).await {
        Some(Estimator::Lpe) => {
            if let Some(fusion) = env.param(&ctx, "LPE_FUSION").await {
                if fusion.has_bit(5) {
                    ctx.info("\"pub agl as lpos down\" in LPE_FUSION is enabled, operating over flat surface");
                } else {
                    ctx.info("\"pub agl as lpos down\" in LPE_FUSION is disabled, NOT operating over flat surface");
                }
            }
        }
        Some(Estimator::Ekf2) => {
            if let Some(mode) = env.param(&ctx, "EKF2_HGT_MODE").await {
                if mode.as_i64() == 2 {
                    ctx.info("EKF2_HGT_MODE = Range sensor, operating over flat surface");
                } else {
                    ctx.info("EKF2_HGT_MODE != Range sensor, NOT operating over flat surface");
                }
            }
            if let Some(aid) = env.param(&ctx, "EKF2_RNG_AID").await {
                if aid.as_i64() == 1 {
                    ctx.info("EKF2_RNG_AID = 1, range aid is enabled");
                } else {
                    ctx.info("EKF2_RNG_AID != 1, range aid is disabled");
                }
            }
        }
        Some(Estimator::Unknown(_)) | None => {}
    }
    Ok(())
}
