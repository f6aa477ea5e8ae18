use crate::types::{PeerConnectionSummary, Revisioned, Update};

/// Keep whichever document has the strictly higher revision; ties keep `held`.
fn newer(held: &mut Option<Revisioned>, incoming: &Option<Revisioned>) {
    match (held.as_ref(), incoming) {
        (None, Some(incoming)) => *held = Some(incoming.clone()),
        (Some(current), Some(incoming)) if incoming.revision > current.revision => {
            *held = Some(incoming.clone());
        }
        _ => {}
    }
}

/// Collapse peer-connection summaries to one per `id`.
///
/// `description` and `ice` are reduced independently to their highest
/// revision. Output follows the first-seen order of ids.
pub fn reduce_peer_connections<I>(peer_connections: I) -> Vec<PeerConnectionSummary>
where
    I: IntoIterator<Item = PeerConnectionSummary>,
{
    let mut reduced: Vec<PeerConnectionSummary> = Vec::new();

    for summary in peer_connections {
        match reduced.iter_mut().find(|held| held.id == summary.id) {
            Some(held) => {
                newer(&mut held.description, &summary.description);
                newer(&mut held.ice, &summary.ice);
            }
            None => reduced.push(summary),
        }
    }

    reduced
}

/// Coalesce queued updates into one, keeping the newest participant state and
/// the newest per-field peer-connection state.
pub fn reduce_updates<I>(updates: I) -> Update
where
    I: IntoIterator<Item = Update>,
{
    let mut name = None;
    let mut participant = None;
    let mut peer_connections: Option<Vec<PeerConnectionSummary>> = None;

    for update in updates {
        if update.name.is_some() {
            name = update.name;
        }
        newer(&mut participant, &update.participant);

        if let Some(incoming) = update.peer_connections {
            let merged = match peer_connections.take() {
                Some(mut held) => {
                    held.extend(incoming);
                    held
                }
                None => incoming,
            };
            peer_connections = Some(reduce_peer_connections(merged));
        }
    }

    Update {
        name,
        participant,
        peer_connections,
        ..Update::default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::RSP_VERSION;

    fn doc(revision: u64, key: &str, value: serde_json::Value) -> Revisioned {
        Revisioned::new(revision).with_field(key, value)
    }

    fn queued_while_connecting() -> Vec<Update> {
        vec![
            Update::default()
                .with_participant(doc(1, "tracks", json!([])))
                .with_peer_connections(vec![
                    PeerConnectionSummary::new("a")
                        .with_description(doc(1, "type", json!("alpha")))
                        .with_ice(doc(2, "candidates", json!(["candidate1", "candidate2"]))),
                ]),
            Update::default()
                .with_participant(doc(2, "tracks", json!([{ "fizz": "buzz" }])))
                .with_peer_connections(vec![
                    PeerConnectionSummary::new("a")
                        .with_description(doc(2, "type", json!("beta")))
                        .with_ice(doc(1, "candidates", json!(["candidate1"]))),
                    PeerConnectionSummary::new("b")
                        .with_description(doc(1, "type", json!("gamma"))),
                    PeerConnectionSummary::new("c"),
                ]),
        ]
    }

    #[test]
    fn reduces_queued_updates_to_newest_revisions() {
        let reduced = reduce_updates(queued_while_connecting());

        assert_eq!(
            serde_json::to_value(&reduced).expect("encode"),
            json!({
                "version": RSP_VERSION,
                "participant": { "revision": 2, "tracks": [{ "fizz": "buzz" }] },
                "peer_connections": [
                    {
                        "id": "a",
                        "description": { "revision": 2, "type": "beta" },
                        "ice": { "revision": 2, "candidates": ["candidate1", "candidate2"] }
                    },
                    { "id": "b", "description": { "revision": 1, "type": "gamma" } },
                    { "id": "c" }
                ]
            })
        );
    }

    #[test]
    fn first_seen_wins_on_revision_tie() {
        let reduced = reduce_peer_connections(vec![
            PeerConnectionSummary::new("a").with_ice(doc(3, "candidates", json!(["first"]))),
            PeerConnectionSummary::new("a").with_ice(doc(3, "candidates", json!(["second"]))),
        ]);

        assert_eq!(reduced.len(), 1);
        assert_eq!(
            reduced[0].ice.as_ref().and_then(|ice| ice.fields.get("candidates")),
            Some(&json!(["first"]))
        );
    }

    #[test]
    fn participant_revision_never_regresses() {
        let reduced = reduce_updates(vec![
            Update::default().with_participant(Revisioned::new(5)),
            Update::default().with_participant(Revisioned::new(3)),
            Update::default(),
        ]);
        assert_eq!(reduced.participant.map(|p| p.revision), Some(5));
    }

    #[test]
    fn incremental_reduction_matches_reducing_the_concatenation() {
        let updates = queued_while_connecting();
        let concatenated: Vec<_> = updates
            .iter()
            .flat_map(|update| update.peer_connections.clone().unwrap_or_default())
            .collect();

        assert_eq!(
            reduce_updates(updates).peer_connections,
            Some(reduce_peer_connections(concatenated))
        );
    }

    #[test]
    fn reduction_is_idempotent() {
        let single = queued_while_connecting().remove(1);

        let once = reduce_updates(vec![single.clone()]);
        let twice = reduce_updates(vec![single.clone(), single.clone()]);

        assert_eq!(once, twice);
        assert_eq!(once.participant, single.participant);
        assert_eq!(once.peer_connections, single.peer_connections);
    }

    #[test]
    fn latest_room_name_survives_reduction() {
        let named = |name: &str| Update {
            name: Some(name.to_owned()),
            ..Update::default()
        };
        let reduced = reduce_updates(vec![named("first"), named("second"), Update::default()]);
        assert_eq!(reduced.name.as_deref(), Some("second"));
    }

    #[test]
    fn empty_fields_stay_absent() {
        let reduced = reduce_updates(vec![Update::default(), Update::default()]);
        assert_eq!(reduced, Update::default());
    }
}
