//! Text command surface over the registry. Every command runs on behalf of one
//! acting player and produces a reply line (or lines) for that player.

use std::fmt::Write as _;

use uuid::Uuid;

use super::action::GuildAction;
use super::errors::GuildError;
use super::model::{Guild, Location, Region};
use super::rank::GuildRank;
use super::registry::GuildRegistry;

#[derive(Debug, Clone, PartialEq)]
pub enum GuildCommand {
    Create(String),
    Join(String),
    Leave,
    Kick(Uuid),
    Disband,
    Show(Option<String>),
    List,
    RankCreate { name: String, actions: Vec<GuildAction> },
    RankRemove(String),
    RankAssign { target: Uuid, rank: String },
    SetHome(Location),
    SetHall(Region),
    Say(String),
    Help,
    /// Unparseable input, carrying the usage hint to show.
    Unknown(String),
}

fn parse_player(text: &str) -> Option<Uuid> {
    Uuid::parse_str(text).ok()
}

fn parse_actions(list: &str) -> Result<Vec<GuildAction>, String> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|token| {
            GuildAction::from_token(token).ok_or_else(|| {
                let known: Vec<&str> = GuildAction::ALL.iter().map(|a| a.token()).collect();
                format!("Unknown action '{}'. Known: {}", token.trim(), known.join(", "))
            })
        })
        .collect()
}

fn parse_coords<const N: usize>(parts: &[&str]) -> Option<[f64; N]> {
    if parts.len() != N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part.parse::<f64>().ok().filter(|n| n.is_finite())?;
    }
    Some(out)
}

/// Block coordinate containing `v`, matching [`Location::block`].
fn block(v: f64) -> i64 {
    v.floor() as i64
}

/// Parse one input line. The verb is case-insensitive; arguments keep their case.
pub fn parse_command(input: &str) -> GuildCommand {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let Some(verb) = parts.first() else {
        return GuildCommand::Unknown("Type HELP for commands".to_string());
    };
    let rest = &parts[1..];

    match verb.to_uppercase().as_str() {
        "CREATE" => {
            if rest.is_empty() {
                GuildCommand::Unknown("Usage: CREATE <name>".to_string())
            } else {
                GuildCommand::Create(rest.join(" "))
            }
        }
        "JOIN" => {
            if rest.is_empty() {
                GuildCommand::Unknown("Usage: JOIN <guild>".to_string())
            } else {
                GuildCommand::Join(rest.join(" "))
            }
        }
        "LEAVE" => GuildCommand::Leave,
        "KICK" => match rest.first().and_then(|p| parse_player(p)) {
            Some(target) if rest.len() == 1 => GuildCommand::Kick(target),
            _ => GuildCommand::Unknown("Usage: KICK <player-id>".to_string()),
        },
        "DISBAND" => GuildCommand::Disband,
        "SHOW" | "INFO" => {
            if rest.is_empty() {
                GuildCommand::Show(None)
            } else {
                GuildCommand::Show(Some(rest.join(" ")))
            }
        }
        "LIST" => GuildCommand::List,
        "RANK" => parse_rank(rest),
        "SETHOME" => match rest {
            [world, coords @ ..] => match parse_coords::<3>(coords) {
                Some([x, y, z]) => GuildCommand::SetHome(Location::new(*world, x, y, z)),
                None => GuildCommand::Unknown("Usage: SETHOME <world> <x> <y> <z>".to_string()),
            },
            [] => GuildCommand::Unknown("Usage: SETHOME <world> <x> <y> <z>".to_string()),
        },
        "SETHALL" => match rest {
            [world, coords @ ..] => match parse_coords::<6>(coords) {
                Some([x1, y1, z1, x2, y2, z2]) => GuildCommand::SetHall(Region::new(
                    *world,
                    (block(x1), block(y1), block(z1)),
                    (block(x2), block(y2), block(z2)),
                )),
                None => GuildCommand::Unknown(
                    "Usage: SETHALL <world> <x1> <y1> <z1> <x2> <y2> <z2>".to_string(),
                ),
            },
            [] => GuildCommand::Unknown(
                "Usage: SETHALL <world> <x1> <y1> <z1> <x2> <y2> <z2>".to_string(),
            ),
        },
        "SAY" | "GC" => {
            if rest.is_empty() {
                GuildCommand::Unknown("Usage: SAY <message>".to_string())
            } else {
                GuildCommand::Say(rest.join(" "))
            }
        }
        "HELP" | "?" => GuildCommand::Help,
        other => GuildCommand::Unknown(format!("Unknown command '{}'. Type HELP", other)),
    }
}

fn parse_rank(parts: &[&str]) -> GuildCommand {
    let usage = "Usage: RANK CREATE <name> [action,...] | RANK REMOVE <name> \
                 | RANK ASSIGN <player-id> <name>";
    let Some(sub) = parts.first() else {
        return GuildCommand::Unknown(usage.to_string());
    };
    match (sub.to_uppercase().as_str(), &parts[1..]) {
        ("CREATE", [name]) => GuildCommand::RankCreate {
            name: name.to_string(),
            actions: Vec::new(),
        },
        ("CREATE", [name, actions]) => match parse_actions(actions) {
            Ok(actions) => GuildCommand::RankCreate {
                name: name.to_string(),
                actions,
            },
            Err(message) => GuildCommand::Unknown(message),
        },
        ("REMOVE", [name]) => GuildCommand::RankRemove(name.to_string()),
        ("ASSIGN", [player, name]) => match parse_player(player) {
            Some(target) => GuildCommand::RankAssign {
                target,
                rank: name.to_string(),
            },
            None => GuildCommand::Unknown(usage.to_string()),
        },
        _ => GuildCommand::Unknown(usage.to_string()),
    }
}

pub fn help_text(registry: &GuildRegistry) -> String {
    let settings = registry.settings();
    format!(
        "Guild commands:\n\
         CREATE <name>          found a guild (cost {})\n\
         JOIN <guild>           join a guild (cost {})\n\
         LEAVE                  leave your guild\n\
         KICK <player-id>       remove a member\n\
         DISBAND                disband your guild (leader)\n\
         SHOW [guild]           guild details\n\
         LIST                   all guilds\n\
         RANK CREATE|REMOVE|ASSIGN ...\n\
         SETHOME <world> <x> <y> <z>\n\
         SETHALL <world> <x1> <y1> <z1> <x2> <y2> <z2>  claim a hall (cost {})\n\
         SAY <message>          talk on the guild channel",
        settings.creation_cost(),
        settings.invite_cost(),
        settings.hall_cost()
    )
}

fn describe(guild: &Guild) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({} members, influence {})",
        guild.name(),
        guild.members().len(),
        guild.influence()
    );
    let _ = writeln!(out, "Leader: {}", guild.leader());
    for rank in guild.ranks() {
        let actions: Vec<&str> = rank.permitted().iter().map(|a| a.token()).collect();
        let actions = if actions.is_empty() {
            "-".to_string()
        } else {
            actions.join(",")
        };
        let _ = writeln!(
            out,
            "  {} [{}] {} member(s)",
            rank.name(),
            actions,
            rank.members().len()
        );
    }
    if let Some(home) = guild.home() {
        let _ = writeln!(out, "Home: {home}");
    }
    if let Some(hall) = guild.hall() {
        let _ = writeln!(out, "Hall: {hall}");
    }
    out.trim_end().to_string()
}

fn reply(result: Result<String, GuildError>) -> String {
    match result {
        Ok(text) => text,
        Err(e) => format!("Error: {e}"),
    }
}

fn own_guild(registry: &GuildRegistry, actor: &Uuid) -> Result<Uuid, GuildError> {
    registry
        .lookup_by_member(actor)
        .map(Guild::id)
        .ok_or(GuildError::NotMember(*actor))
}

/// Run a parsed command as `actor` and return the reply text.
pub fn execute(registry: &mut GuildRegistry, actor: Uuid, command: GuildCommand) -> String {
    if !registry.is_loaded() && !matches!(command, GuildCommand::Help | GuildCommand::Unknown(_)) {
        return format!("Error: {}", GuildError::NotLoaded);
    }
    let result = match command {
        GuildCommand::Create(name) => registry
            .create_guild(&name, actor)
            .map(|_| format!("Guild '{name}' founded.")),
        GuildCommand::Join(name) => match registry.lookup_by_name(&name).map(Guild::id) {
            Some(id) => registry
                .join_guild(id, actor)
                .map(|_| format!("You joined '{name}'.")),
            None => Ok(format!("No guild named '{name}'.")),
        },
        GuildCommand::Leave => registry
            .leave_guild(actor)
            .map(|_| "You left your guild.".to_string()),
        GuildCommand::Kick(target) => own_guild(registry, &actor)
            .and_then(|id| registry.kick_member(id, actor, target))
            .map(|_| format!("{target} was kicked.")),
        GuildCommand::Disband => own_guild(registry, &actor).and_then(|id| {
            let guild = registry.lookup_by_id(id).ok_or(GuildError::UnknownGuild(id))?;
            if !guild.is_leader(&actor) {
                return Err(GuildError::LeaderOnly);
            }
            registry
                .remove_guild(id)
                .map(|g| format!("Guild '{}' disbanded.", g.name()))
        }),
        GuildCommand::Show(name) => {
            let guild = match &name {
                Some(name) => registry.lookup_by_name(name),
                None => registry.lookup_by_member(&actor),
            };
            Ok(match guild {
                Some(guild) => describe(guild),
                None => match name {
                    Some(name) => format!("No guild named '{name}'."),
                    None => "You are not in a guild.".to_string(),
                },
            })
        }
        GuildCommand::List => Ok(match registry.snapshot() {
            Some(guilds) if !guilds.is_empty() => guilds
                .iter()
                .map(|g| format!("{} ({})", g.name(), g.members().len()))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => "No guilds yet.".to_string(),
        }),
        GuildCommand::RankCreate { name, actions } => GuildRank::new(name.clone(), actions)
            .and_then(|rank| {
                let id = own_guild(registry, &actor)?;
                registry.create_rank(id, actor, rank)
            })
            .map(|_| format!("Rank '{name}' created.")),
        GuildCommand::RankRemove(name) => own_guild(registry, &actor)
            .and_then(|id| registry.remove_rank(id, actor, &name))
            .map(|rank| format!("Rank '{}' removed.", rank.name())),
        GuildCommand::RankAssign { target, rank } => own_guild(registry, &actor)
            .and_then(|id| registry.assign_rank(id, actor, target, &rank))
            .map(|_| format!("{target} is now {rank}.")),
        GuildCommand::SetHome(location) => own_guild(registry, &actor)
            .and_then(|id| registry.set_home(id, actor, Some(location.clone())))
            .map(|_| format!("Guild home set to {location}.")),
        GuildCommand::SetHall(region) => own_guild(registry, &actor)
            .and_then(|id| registry.set_hall(id, actor, Some(region.clone())))
            .map(|_| format!("Guild hall claimed: {region}.")),
        GuildCommand::Say(text) => registry
            .post_message(actor, &text)
            .map(|_| format!("[guild] {actor}: {text}")),
        GuildCommand::Help => Ok(help_text(registry)),
        GuildCommand::Unknown(message) => Ok(message),
    };
    reply(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GuildConfig, PersistenceConfig, StorageConfig};
    use crate::storage::StorageManager;
    use tempfile::TempDir;

    #[test]
    fn verbs_are_case_insensitive_arguments_are_not() {
        assert_eq!(
            parse_command("create Iron Wolves"),
            GuildCommand::Create("Iron Wolves".into())
        );
        assert_eq!(
            parse_command("JoIn Iron Wolves"),
            GuildCommand::Join("Iron Wolves".into())
        );
        assert_eq!(parse_command("  leave "), GuildCommand::Leave);
        assert_eq!(parse_command("info"), GuildCommand::Show(None));
    }

    #[test]
    fn rank_subcommands() {
        assert_eq!(
            parse_command("rank create Officer kick,SetHome"),
            GuildCommand::RankCreate {
                name: "Officer".into(),
                actions: vec![GuildAction::KickMember, GuildAction::SetHome],
            }
        );
        assert_eq!(
            parse_command("rank create Recruit"),
            GuildCommand::RankCreate {
                name: "Recruit".into(),
                actions: vec![],
            }
        );
        let id = Uuid::new_v4();
        assert_eq!(
            parse_command(&format!("rank assign {id} Officer")),
            GuildCommand::RankAssign {
                target: id,
                rank: "Officer".into(),
            }
        );
        assert!(matches!(
            parse_command("rank create Officer fly"),
            GuildCommand::Unknown(m) if m.contains("fly")
        ));
        assert!(matches!(parse_command("rank"), GuildCommand::Unknown(_)));
    }

    #[test]
    fn coordinates_and_bad_input() {
        assert_eq!(
            parse_command("sethome world 1 64.5 -3"),
            GuildCommand::SetHome(Location::new("world", 1.0, 64.5, -3.0))
        );
        assert_eq!(
            parse_command("sethall world 10 0 10 0 20 0"),
            GuildCommand::SetHall(Region::new("world", (0, 0, 0), (10, 20, 10)))
        );
        // Corners round down like the block a player stands in.
        assert_eq!(
            parse_command("sethall world -0.5 0 -2.5 3.9 1 0"),
            GuildCommand::SetHall(Region::new("world", (-1, 0, -3), (3, 1, 0)))
        );
        assert!(matches!(parse_command("sethome world 1 2"), GuildCommand::Unknown(_)));
        assert!(matches!(parse_command("kick bob"), GuildCommand::Unknown(_)));
        assert!(matches!(parse_command(""), GuildCommand::Unknown(_)));
        assert!(matches!(
            parse_command("dance"),
            GuildCommand::Unknown(m) if m.contains("DANCE")
        ));
        for line in [
            "sethome world NaN 64 0",
            "sethome world 1 inf 0",
            "sethall w 0 0 0 1 1 -inf",
        ] {
            assert!(matches!(parse_command(line), GuildCommand::Unknown(_)), "{line}");
        }
    }

    #[tokio::test]
    async fn console_session() {
        let dir = TempDir::new().unwrap();
        let storage = StorageConfig {
            data_dir: dir.path().to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };
        let manager = StorageManager::start(&storage, &PersistenceConfig::default());
        let mut registry = GuildRegistry::start(manager.clone(), &GuildConfig::default());
        let leader = Uuid::new_v4();
        let recruit = Uuid::new_v4();

        let early = execute(&mut registry, leader, parse_command("create Alpha"));
        assert!(early.starts_with("Error"), "{early}");
        registry.wait_loaded().await;

        let mut run =
            |actor: Uuid, line: &str| execute(&mut registry, actor, parse_command(line));
        assert_eq!(run(leader, "create Alpha"), "Guild 'Alpha' founded.");
        assert!(run(recruit, "create alpha").starts_with("Error: a guild named"));
        assert_eq!(run(recruit, "join ALPHA"), "You joined 'ALPHA'.");
        assert_eq!(run(leader, "rank create Officer kick"), "Rank 'Officer' created.");
        assert_eq!(
            run(leader, &format!("rank assign {recruit} Officer")),
            format!("{recruit} is now Officer.")
        );
        assert!(run(recruit, "rank remove Officer").starts_with("Error: only the guild leader"));
        assert!(run(leader, "show").contains("Officer [kick] 1 member(s)"));
        assert!(run(recruit, "disband").starts_with("Error: only the guild leader"));
        assert_eq!(run(leader, "disband"), "Guild 'Alpha' disbanded.");
        assert_eq!(run(leader, "list"), "No guilds yet.");

        manager.drain().await;
        assert!(manager.load_guilds().await.unwrap().is_empty());
    }
}
