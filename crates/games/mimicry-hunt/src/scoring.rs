use crate::entity::EntityStats;

/// Points for an evader still in play when the round ends.
pub const SURVIVE_POINTS: i32 = 10;
/// Points per landmark delivered.
pub const DELIVERY_POINTS: i32 = 15;
/// Points per trap escaped by struggling.
pub const ESCAPE_POINTS: i32 = 2;
/// Points deducted from an evader that ended the round permanently out.
pub const ELIMINATED_POINTS: i32 = -3;

/// Points per confirmed strike.
pub const HIT_POINTS: i32 = 1;
/// Points for forcing an evader into second chance.
pub const KNOCKDOWN_POINTS: i32 = 3;
/// Points for putting an evader permanently out.
pub const ELIMINATION_POINTS: i32 = 5;
/// Points per execution.
pub const EXECUTION_POINTS: i32 = 4;
/// Points deducted each time a pursuer is downed.
pub const DOWNED_POINTS: i32 = -2;

/// Bonus for every member of the winning side.
pub const TEAM_WIN_POINTS: i32 = 5;

pub fn evader_score(stats: &EntityStats, eliminated: bool, team_won: bool) -> i32 {
    let mut score = stats.deliveries as i32 * DELIVERY_POINTS + stats.escapes as i32 * ESCAPE_POINTS;
    score += if eliminated {
        ELIMINATED_POINTS
    } else {
        SURVIVE_POINTS
    };
    if team_won {
        score += TEAM_WIN_POINTS;
    }
    score
}

pub fn pursuer_score(stats: &EntityStats, team_won: bool) -> i32 {
    let mut score = stats.hits as i32 * HIT_POINTS
        + stats.knockdowns as i32 * KNOCKDOWN_POINTS
        + stats.eliminations as i32 * ELIMINATION_POINTS
        + stats.executions as i32 * EXECUTION_POINTS
        + stats.deaths as i32 * DOWNED_POINTS;
    if team_won {
        score += TEAM_WIN_POINTS;
    }
    score
}
