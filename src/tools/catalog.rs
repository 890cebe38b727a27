use serde_json::{json, Value};

use super::ToolDeclaration;

fn tool(name: &str, endpoint: &str, description: &str, parameters: Value) -> ToolDeclaration {
    ToolDeclaration {
        name: name.to_string(),
        endpoint: endpoint.to_string(),
        description: description.to_string(),
        parameters,
    }
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Baseball statistics tools served by the stats service.
pub fn stats_tools() -> Vec<ToolDeclaration> {
    vec![
        tool(
            "get_player_stats",
            "player_stats",
            "Season statistics for a specific MLB player.",
            object(
                json!({
                    "player_name": { "type": "string", "description": "Full player name" },
                    "year": { "type": "integer", "description": "Season; defaults to current" }
                }),
                &["player_name"],
            ),
        ),
        tool(
            "search_players",
            "search_players",
            "Search MLB players by (partial) name.",
            object(json!({ "search_term": { "type": "string" } }), &["search_term"]),
        ),
        tool(
            "get_mlb_standings",
            "mlb_standings",
            "MLB standings by division.",
            object(json!({ "year": { "type": "integer" } }), &[]),
        ),
        tool(
            "get_stat_leaders",
            "stat_leaders",
            "League leaders for a single statistic.",
            object(
                json!({
                    "stat": { "type": "string", "description": "Stat abbreviation, e.g. HR, ERA" },
                    "year": { "type": "integer" },
                    "top_n": { "type": "integer", "default": 10 },
                    "player_type": { "type": "string", "enum": ["batting", "pitching"] }
                }),
                &["stat"],
            ),
        ),
        tool(
            "get_player_recent_performance",
            "player_recent_performance",
            "Game-by-game performance for a player over the last N days.",
            object(
                json!({
                    "player_name": { "type": "string" },
                    "days": { "type": "integer", "default": 30 }
                }),
                &["player_name"],
            ),
        ),
        tool(
            "get_team_statistics",
            "team_statistics",
            "Aggregate statistics for an MLB team.",
            object(
                json!({
                    "team_name": { "type": "string" },
                    "year": { "type": "integer" }
                }),
                &["team_name"],
            ),
        ),
        tool(
            "get_schedule_and_record",
            "schedule_and_record",
            "Game results and upcoming schedule for a team.",
            object(
                json!({
                    "season": { "type": "integer" },
                    "team": { "type": "string", "description": "Team abbreviation" }
                }),
                &["season", "team"],
            ),
        ),
        tool(
            "get_playerid_lookup",
            "playerid_lookup",
            "Look up player ids by last name and optional first name.",
            object(
                json!({
                    "last_name": { "type": "string" },
                    "first_name": { "type": "string" }
                }),
                &["last_name"],
            ),
        ),
    ]
}
