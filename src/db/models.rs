/// Row counts of the lookup cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub artists: i64,
    pub artists_fresh: i64,
    pub features: i64,
    pub features_fresh: i64,
}
