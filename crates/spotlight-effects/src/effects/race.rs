use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use spotlight_core::{FaceBox, ServerEvent};

use super::require_faces;
use crate::context::EffectContext;
use crate::effect::Effect;
use crate::error::EffectError;

/// Faces race down parallel lanes; the first across the finish line wins.
///
/// The simulation is deliberately simple: random speed drift, a rubber band
/// that keeps stragglers close to the leader, obstacles that slow a racer and
/// power-ups that boost one for a while.
#[derive(Clone, Debug)]
pub struct RaceEffect {
    pub lanes: usize,
    pub max_racers: usize,
    pub visible_width: f64,
    /// Track length as a multiple of the visible width.
    pub track_factor: f64,
    pub countdown_delay: Duration,
    pub tick: Duration,
    /// Hard stop for the simulation; the leader wins if nobody finished.
    pub max_ticks: usize,
}

impl Default for RaceEffect {
    fn default() -> Self {
        Self {
            lanes: 6,
            max_racers: 24,
            visible_width: 1000.0,
            track_factor: 2.13,
            countdown_delay: Duration::from_secs(1),
            tick: Duration::from_millis(40),
            max_ticks: 5000,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct Racer {
    id: usize,
    position: f64,
    speed: f64,
    lane: usize,
    face_index: usize,
    powerup_timer: u32,
    z_index: usize,
}

#[derive(Clone, Debug, Serialize)]
struct TrackItem {
    id: usize,
    #[serde(rename = "type")]
    kind: u8,
    position: f64,
    lane: usize,
    width: u32,
    height: u32,
    active: bool,
}

/// Something worth telling the client about during one tick.
enum RaceIncident {
    Collision { racer: usize, item: usize },
    Powerup { racer: usize, item: usize },
}

struct Track {
    racers: Vec<Racer>,
    obstacles: Vec<TrackItem>,
    powerups: Vec<TrackItem>,
    length: f64,
    finish_line: f64,
    lanes: usize,
}

const POWERUP_TICKS: u32 = 60;
const HIT_DISTANCE: f64 = 20.0;

impl Track {
    fn new(rng: &mut StdRng, face_indices: &[usize], lanes: usize, length: f64) -> Self {
        let lanes = lanes.max(1);
        let mut per_lane = vec![0usize; lanes];
        let racers = face_indices
            .iter()
            .enumerate()
            .map(|(id, &face_index)| {
                let lane = id % lanes;
                let slot = per_lane[lane];
                per_lane[lane] += 1;
                Racer {
                    id,
                    position: slot as f64 * 40.0,
                    speed: rng.gen_range(1.6..2.6),
                    lane,
                    face_index,
                    powerup_timer: 0,
                    z_index: slot,
                }
            })
            .collect::<Vec<_>>();

        let spread = |rng: &mut StdRng| rng.gen_range(200.0..(length - 200.0).max(201.0));
        let obstacles = (0..racers.len() * 3)
            .map(|id| TrackItem {
                id,
                kind: rng.gen_range(1..=2),
                position: spread(rng),
                lane: rng.gen_range(0..lanes),
                width: 40,
                height: 40,
                active: true,
            })
            .collect();
        let powerups = (0..racers.len() * 2)
            .map(|id| TrackItem {
                id,
                kind: rng.gen_range(1..=2),
                position: spread(rng),
                lane: rng.gen_range(0..lanes),
                width: 30,
                height: 30,
                active: true,
            })
            .collect();

        Self {
            racers,
            obstacles,
            powerups,
            length,
            finish_line: length - 70.0,
            lanes,
        }
    }

    fn racers_per_lane(&self) -> Vec<usize> {
        let mut counts = vec![0; self.lanes];
        for r in &self.racers {
            counts[r.lane] += 1;
        }
        counts
    }

    fn lead_position(&self) -> f64 {
        self.racers
            .iter()
            .map(|r| r.position)
            .fold(0.0, f64::max)
    }

    fn leader(&self) -> Option<&Racer> {
        self.racers
            .iter()
            .max_by(|a, b| a.position.total_cmp(&b.position))
    }

    fn camera_position(&self, visible_width: f64) -> f64 {
        let n = self.racers.len().max(1) as f64;
        let avg = self.racers.iter().map(|r| r.position).sum::<f64>() / n;
        (avg - visible_width * 0.3).clamp(0.0, (self.length - visible_width).max(0.0))
    }

    /// Advance one tick. Returns the incidents and the winner, if any.
    fn step(&mut self, rng: &mut StdRng) -> (Vec<RaceIncident>, Option<usize>) {
        let lead = self.lead_position().max(1.0);
        let field = self.racers.len();
        let mut incidents = Vec::new();

        for lane in 0..self.lanes {
            let mut in_lane: Vec<&mut Racer> =
                self.racers.iter_mut().filter(|r| r.lane == lane).collect();
            in_lane.sort_by(|a, b| b.position.total_cmp(&a.position));
            for (z, racer) in in_lane.into_iter().enumerate() {
                racer.z_index = z;
            }
        }

        for idx in 0..self.racers.len() {
            let racer = &mut self.racers[idx];
            if racer.position >= self.finish_line {
                racer.speed = 0.0;
                continue;
            }
            if racer.powerup_timer > 0 {
                racer.powerup_timer -= 1;
                if racer.powerup_timer == 0 {
                    racer.speed *= 0.7;
                }
            }
            racer.speed = (racer.speed + rng.gen_range(-0.2..0.25)).clamp(1.0, 5.0);

            if racer.position < lead * 0.6 {
                let gap = (lead - racer.position) / lead;
                let mut strength = 0.15;
                if field > 6 {
                    let progress = lead / self.finish_line;
                    strength *= (6.0 / field as f64).min(1.0) * (1.0 - progress * 0.7);
                }
                racer.speed += gap * strength;
            }
            if racer.position >= lead * 0.95 {
                racer.speed *= 0.995;
            }
            racer.position += racer.speed;

            let (lane, position, id) = (racer.lane, racer.position, racer.id);
            for obstacle in self.obstacles.iter_mut() {
                if obstacle.active
                    && obstacle.lane == lane
                    && (obstacle.position - position).abs() < HIT_DISTANCE
                {
                    obstacle.active = false;
                    self.racers[idx].speed *= 0.6;
                    incidents.push(RaceIncident::Collision {
                        racer: id,
                        item: obstacle.id,
                    });
                }
            }
            for powerup in self.powerups.iter_mut() {
                if powerup.active
                    && powerup.lane == lane
                    && (powerup.position - position).abs() < HIT_DISTANCE
                {
                    powerup.active = false;
                    self.racers[idx].speed *= 2.0;
                    self.racers[idx].powerup_timer = POWERUP_TICKS;
                    incidents.push(RaceIncident::Powerup {
                        racer: id,
                        item: powerup.id,
                    });
                }
            }

            if self.racers[idx].position >= self.finish_line {
                return (incidents, Some(idx));
            }
        }
        (incidents, None)
    }
}

#[async_trait]
impl Effect for RaceEffect {
    fn mode(&self) -> &str {
        "race"
    }

    async fn run(&self, ctx: &EffectContext) -> Result<Option<FaceBox>, EffectError> {
        let faces = require_faces(ctx)?;
        let mut rng = StdRng::from_entropy();

        let field = faces.len().min(self.max_racers.max(1));
        let mut face_indices = index::sample(&mut rng, faces.len(), field).into_vec();
        face_indices.sort_unstable();
        let length = self.visible_width * self.track_factor;
        let mut track = Track::new(&mut rng, &face_indices, self.lanes, length);

        let racing_faces: Vec<FaceBox> = face_indices.iter().map(|&i| faces[i]).collect();
        ctx.emit(&json!({
            "type": "init_race",
            "frame": ctx.raw_frame(),
            "faces": racing_faces,
            "face_indices": face_indices,
            "track_config": {
                "width": length,
                "height": track.lanes * 60 + 50,
                "num_lanes": track.lanes,
                "racers_per_lane": track.racers_per_lane(),
                "visible_width": self.visible_width,
                "camera_position": 0,
            },
        }))
        .await?;
        ctx.emit(&json!({
            "type": "race_items",
            "obstacles": track.obstacles,
            "powerups": track.powerups,
        }))
        .await?;
        ctx.loop_sound("race/race_loop").await?;

        for count in ["3", "2", "1", "GO"] {
            ctx.emit(&json!({"type": "race_countdown", "count": count}))
                .await?;
            let sound = if count == "GO" { "race/race_start" } else { "race/beep" };
            ctx.play_sound(sound).await?;
            ctx.pause(self.countdown_delay).await?;
        }

        let mut winner = None;
        for _ in 0..self.max_ticks {
            let camera = track.camera_position(self.visible_width);
            let (incidents, finished) = track.step(&mut rng);
            for incident in incidents {
                match incident {
                    RaceIncident::Collision { racer, item } => {
                        ctx.emit(&json!({"type": "race_collision", "racer_id": racer, "item_id": item}))
                            .await?;
                        ctx.play_sound("race/crash").await?;
                    }
                    RaceIncident::Powerup { racer, item } => {
                        ctx.emit(&json!({"type": "race_powerup", "racer_id": racer, "item_id": item}))
                            .await?;
                        ctx.play_sound("race/powerup").await?;
                    }
                }
            }
            if let Some(idx) = finished {
                winner = Some(idx);
            }
            let obstacles: Vec<&TrackItem> = track.obstacles.iter().filter(|o| o.active).collect();
            let powerups: Vec<&TrackItem> = track.powerups.iter().filter(|p| p.active).collect();
            ctx.emit(&json!({
                "type": "race_update",
                "racers": track.racers,
                "obstacles": obstacles,
                "powerups": powerups,
                "camera_position": camera,
            }))
            .await?;
            if winner.is_some() {
                break;
            }
            ctx.pause(self.tick).await?;
        }

        let winner = match winner {
            Some(idx) => &track.racers[idx],
            None => track
                .leader()
                .ok_or_else(|| EffectError::Failed("race has no racers".into()))?,
        };
        let face = faces[winner.face_index];
        ctx.emit(&json!({
            "type": "race_result",
            "winner_id": winner.id,
            "winner_index": winner.face_index,
            "face": face,
        }))
        .await?;
        ctx.stop_sound("race/race_loop").await?;
        ctx.play_sound("race/win").await?;
        ctx.emit_event(&ServerEvent::SelectionComplete {
            mode: ctx.mode().to_string(),
        })
        .await?;
        Ok(Some(face))
    }
}
