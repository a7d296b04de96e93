//! Game modes as small strategy values.
//!
//! The three modes share one lifecycle and one scoring engine; they differ
//! only in who may be paired with whom and whether duel rules apply.

use chrono::{DateTime, Utc};
use rand::RngCore;
use rusqlite::Connection;

use super::lifecycle::{self, Resolved};
use super::matchmaker::PairingRule;
use super::scoring::{self, ScoreDecision};
use crate::config::Tuning;
use crate::db;
use crate::domain::{Attempt, GameSettings, Item, ModeKind, Side};
use crate::error::{DuelError, Result};

/// Inputs shared by every step of one request
#[derive(Debug, Clone, Copy)]
pub struct PlayContext<'a> {
    pub game: &'a GameSettings,
    pub player_id: i64,
    pub tuning: &'a Tuning,
    pub now: DateTime<Utc>,
}

pub trait GameMode: Send + Sync {
    fn kind(&self) -> ModeKind;

    /// Who the player may be paired with, and when to give up
    fn pairing_rule(&self, conn: &Connection, ctx: &PlayContext<'_>) -> Result<PairingRule>;

    /// Double-or-nothing and wizard positions
    fn applies_duel_rules(&self) -> bool {
        true
    }

    /// The player's current attempt, pairing and creating a bout as needed
    fn resolve_attempt(
        &self,
        conn: &Connection,
        ctx: &PlayContext<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<Resolved> {
        lifecycle::resolve_attempt(conn, self, ctx, rng)
    }

    fn score_answer(
        &self,
        item: &Item,
        attempt: &Attempt,
        correct: bool,
        opponent: Option<&Attempt>,
        ctx: &PlayContext<'_>,
    ) -> ScoreDecision {
        scoring::score_answer(
            item,
            attempt,
            correct,
            opponent,
            ctx.game,
            ctx.tuning,
            self.applies_duel_rules(),
        )
    }

    /// Close `side` of the pair once none of its attempts is left unanswered
    fn close_if_complete(
        &self,
        conn: &Connection,
        pair_id: i64,
        side: Side,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        lifecycle::close_side_if_complete(conn, pair_id, side, now)
    }
}

/// Play alone: every pair keeps an empty side B
pub struct Solo;

/// Pair with anyone in the game, up to the alone cap
pub struct Duel;

/// Pair within the player's group; at the alone cap, with anyone playing alone
pub struct Split;

impl GameMode for Solo {
    fn kind(&self) -> ModeKind {
        ModeKind::Solo
    }

    fn pairing_rule(&self, _conn: &Connection, _ctx: &PlayContext<'_>) -> Result<PairingRule> {
        Ok(PairingRule::Never)
    }

    fn applies_duel_rules(&self) -> bool {
        false
    }
}

impl GameMode for Duel {
    fn kind(&self) -> ModeKind {
        ModeKind::Duel
    }

    fn pairing_rule(&self, _conn: &Connection, ctx: &PlayContext<'_>) -> Result<PairingRule> {
        Ok(PairingRule::Open {
            pool: None,
            alone_cap: i64::from(ctx.game.max_alone_count(ctx.tuning)),
            widen_at_cap: false,
        })
    }
}

impl GameMode for Split {
    fn kind(&self) -> ModeKind {
        ModeKind::Split
    }

    fn pairing_rule(&self, conn: &Connection, ctx: &PlayContext<'_>) -> Result<PairingRule> {
        let player = db::get_player(conn, ctx.player_id)?
            .ok_or(DuelError::InvalidUser(ctx.player_id))?;
        // a player without a group competes with the whole game
        let pool = match player.group_name {
            Some(group) => Some(db::get_group_member_ids(conn, &group)?),
            None => None,
        };
        Ok(PairingRule::Open {
            pool,
            alone_cap: i64::from(ctx.game.max_alone_count(ctx.tuning)),
            widen_at_cap: true,
        })
    }
}

static SOLO: Solo = Solo;
static DUEL: Duel = Duel;
static SPLIT: Split = Split;

pub fn mode_for(kind: ModeKind) -> &'static dyn GameMode {
    match kind {
        ModeKind::Solo => &SOLO,
        ModeKind::Duel => &DUEL,
        ModeKind::Split => &SPLIT,
    }
}
