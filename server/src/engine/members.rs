use rand::Rng;
use rand::seq::SliceRandom;

use super::snapshot::MemberSample;
use crate::platform::{GuildInfo, GuildMember};

/// Where the online count came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineSource {
    /// Human members whose reported presence is anything but offline.
    Presence,
    /// The platform's own approximate presence count for the guild.
    GuildEstimate,
    /// No presence data at all; every member counts as online.
    TotalFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberStats {
    pub total_members: u64,
    pub online_members: u64,
    pub online_source: OnlineSource,
    pub sample_members: Vec<MemberSample>,
}

/// Count online members.
///
/// Per-member presence wins when any member carries it; otherwise the guild's
/// approximate presence count; otherwise the total member count.
pub fn count_online(guild: &GuildInfo, members: &[GuildMember]) -> (u64, OnlineSource) {
    if members.iter().any(|m| m.presence.is_some()) {
        let online = members
            .iter()
            .filter(|m| !m.bot)
            .filter(|m| m.presence.is_some_and(|p| !p.is_offline()))
            .count() as u64;
        return (online, OnlineSource::Presence);
    }

    match guild.approximate_presence_count {
        Some(count) => (count, OnlineSource::GuildEstimate),
        None => (guild.member_count, OnlineSource::TotalFallback),
    }
}

/// Random subset of human members with a custom avatar, at most `size` long.
pub fn pick_sample<R: Rng + ?Sized>(
    members: &[GuildMember],
    size: usize,
    rng: &mut R,
) -> Vec<MemberSample> {
    let candidates: Vec<&GuildMember> = members
        .iter()
        .filter(|m| !m.bot && m.avatar_url.is_some())
        .collect();

    candidates
        .choose_multiple(rng, size)
        .filter_map(|m| {
            Some(MemberSample {
                id: m.user_id.clone(),
                name: m.display_name.clone(),
                avatar: m.avatar_url.clone()?,
            })
        })
        .collect()
}

/// Member/status pass over already fetched guild data. Bots count toward the total.
pub fn summarize(guild: &GuildInfo, members: &[GuildMember], sample_size: usize) -> MemberStats {
    let (online_members, online_source) = count_online(guild, members);
    let sample_members = pick_sample(members, sample_size, &mut rand::thread_rng());

    MemberStats {
        total_members: guild.member_count,
        online_members,
        online_source,
        sample_members,
    }
}
