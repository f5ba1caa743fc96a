use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use reqwest::cookie::Jar;
use tracing::{error, info, warn};

use crate::cache::{Cache, CacheWriter};
use crate::config::Config;
use crate::dump::append_dump;
use crate::model::{sort_by_popularity, MediaItem, MediaItemBuilder, Profile};
use crate::paginate::{fetch_all, GraphQuery};
use crate::parse::{decode_profile, RawPayload};
use crate::render::{write_gallery, RenderOptions};
use crate::request::{GetOptions, Transport};
use crate::session::{self, Session};
use crate::thumbs::{attach_thumbs, ThumbStore};
use crate::{info_time, Result};

/// Fetches and renders every configured profile, one after the other. A profile that
/// fails is logged and skipped, the others still run.
pub async fn process_site(config: Config) -> Result<()> {
    let start_time = Local::now();
    let mut scraper = Scraper::new(config).await?;

    info_time!("Started scraping {} profiles", scraper.config.usernames.len());
    for username in scraper.config.usernames.clone() {
        match scraper.process_profile(&username).await {
            Ok(Some(path)) => info!("Wrote {}", path.display()),
            Ok(None) => warn!("Nothing to render for {username}"),
            Err(e) => error!("Processing {username} failed: {e}"),
        }
    }
    scraper.save_session().await;
    info_time!(start_time, "Finished PROCESSING ALL profiles.");
    Ok(())
}

/// Owns the one transport and session of a run.
pub struct Scraper {
    config: Config,
    transport: Transport,
    session: Session,
    auth_attempted: bool,
    cache: Cache,
}

impl Scraper {
    pub async fn new(config: Config) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        session::load_blob(&config.session_file, &jar, &config.base_url).await;
        let transport = Transport::new(&config, jar)?;
        let cache = Cache::new(&config.cache_dir);
        Ok(Self {
            config,
            transport,
            session: Session::new(),
            auth_attempted: false,
            cache,
        })
    }

    /// Collects, sorts, caps and renders one profile. `None` when neither the site
    /// nor the cache had anything for it.
    pub async fn process_profile(&mut self, username: &str) -> Result<Option<PathBuf>> {
        if self.config.dump {
            return self.dump_profile(username).await;
        }
        let start_time = Local::now();
        let Some((profile, mut items)) = self.collect(username).await else {
            return Ok(None);
        };

        sort_by_popularity(&mut items);
        items.truncate(self.config.max_items);

        let store = ThumbStore::new(&self.config.out_dir, username);
        attach_thumbs(
            &mut self.transport,
            &store,
            &mut items,
            !self.config.skip_thumbs,
        )
        .await;

        let opts = RenderOptions {
            per_page: self.config.per_page,
            size: self.config.size,
        };
        let path = write_gallery(
            &self.config.out_dir,
            &profile,
            &items,
            &self.config.base_url,
            opts,
        )
        .await?;
        info_time!(start_time, "Rendered {} items of {}", items.len(), username);
        Ok(Some(path))
    }

    /// Appends the live feed of one profile to its dump file, in feed order.
    async fn dump_profile(&mut self, username: &str) -> Result<Option<PathBuf>> {
        let now = Local::now();
        let Some((_, items)) = self.fetch_live(username).await else {
            return Ok(None);
        };
        let path = append_dump(&self.config.out_dir, username, &items, now).await?;
        info_time!(now, "Dumped {} items of {}", items.len(), username);
        Ok(Some(path))
    }

    /// Profile snapshot and items, from the site unless a cache exists and overwriting
    /// is off. The cache also stands in when the site can't be reached.
    pub async fn collect(&mut self, username: &str) -> Option<(Profile, Vec<MediaItem>)> {
        if !self.config.overwrite && self.cache.has_profile(username).await {
            info!("Using cached records for {username}");
            return self.load_cached(username).await;
        }
        match self.fetch_live(username).await {
            Some(found) => Some(found),
            None => {
                warn!("Couldn't fetch {username}, falling back to the cache");
                self.load_cached(username).await
            }
        }
    }

    async fn fetch_live(&mut self, username: &str) -> Option<(Profile, Vec<MediaItem>)> {
        if !self.ensure_session().await {
            return None;
        }

        let url = format!("{}/{username}/", self.config.base_url);
        let fetched = self.transport.get(&url, GetOptions::default()).await?;
        let (mut profile, seed) = decode_profile(&RawPayload::HtmlEmbedded(fetched.text()))?;
        if profile.username.is_empty() {
            profile.username = username.to_string();
        }
        if let Err(e) = self.cache.put_profile(username, &profile).await {
            warn!("Couldn't cache profile of {username}: {e}");
        }

        let mut writer = CacheWriter::new(&self.cache, username, self.config.overwrite);
        let mut source = GraphQuery::new(&mut self.transport, &self.session, &self.config.base_url);
        let walk = fetch_all(
            &mut source,
            &profile.id,
            self.config.max_pages,
            seed,
            &mut writer,
        )
        .await;
        info!(
            "{username}: {} items in {} pages ({:?}), {} cached, {} already cached",
            walk.items.len(),
            walk.pages,
            walk.state,
            writer.written,
            writer.skipped
        );
        Some((profile, walk.items))
    }

    async fn load_cached(&self, username: &str) -> Option<(Profile, Vec<MediaItem>)> {
        let profile = self.cache.get_profile(username).await.unwrap_or_else(|| Profile {
            username: username.to_string(),
            ..Default::default()
        });
        let items: Vec<_> = self
            .cache
            .get_all(username)
            .await
            .iter()
            .map(MediaItemBuilder::from_node)
            .collect();
        if items.is_empty() && profile.id.is_empty() {
            return None;
        }
        Some((profile, items))
    }

    /// Authenticates once per run. Later calls report the first outcome.
    async fn ensure_session(&mut self) -> bool {
        if !self.auth_attempted {
            self.auth_attempted = true;
            self.session
                .authenticate(&mut self.transport, &self.config.base_url)
                .await;
        }
        self.session.is_authenticated()
    }

    pub async fn save_session(&self) {
        if !self.session.is_authenticated() {
            return;
        }
        if let Err(e) = session::save_blob(
            &self.config.session_file,
            self.transport.jar(),
            &self.config.base_url,
        )
        .await
        {
            warn!("Couldn't store the session: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::config::RetryPolicy;
    use crate::paginate::query_variables;
    use crate::parse::tests::{profile_html, timeline};
    use crate::QUERY_HASH;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, dir: &Path) -> Config {
        Config {
            usernames: vec!["alice".into()],
            max_items: 3,
            per_page: 2,
            cache_dir: dir.join("pkls"),
            out_dir: dir.join("html"),
            session_file: dir.join("session.txt"),
            base_url: server.uri(),
            interval: Duration::ZERO,
            retry: RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
            },
            ..Default::default()
        }
    }

    fn node(id: &str, likes: u64, thumb: String) -> serde_json::Value {
        json!({
            "id": id,
            "shortcode": format!("sc{id}"),
            "display_url": thumb.clone(),
            "thumbnail_src": thumb,
            "edge_liked_by": { "count": likes }
        })
    }

    async fn mount_site(server: &MockServer) {
        let thumb = format!("{}/t.jpg", server.uri());
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "csrftoken=tok; Path=/")
                    .set_body_string(profile_html(json!({}))),
            )
            .mount(server)
            .await;
        let seed = json!({
            "id": "99",
            "username": "alice",
            "edge_owner_to_timeline_media": {
                "count": 60,
                "page_info": { "has_next_page": true, "end_cursor": "c1" },
                "edges": [
                    { "node": node("1", 5, thumb.clone()) },
                    { "node": node("2", 50, thumb.clone()) }
                ]
            }
        });
        Mock::given(method("GET"))
            .and(path("/alice/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(profile_html(seed)))
            .expect(1)
            .mount(server)
            .await;
        let mut second = json!({ "data": { "user": {
            "edge_owner_to_timeline_media": timeline(&[], false, None, 4)
        } } });
        second["data"]["user"]["edge_owner_to_timeline_media"]["edges"] = json!([
            { "node": node("3", 20, thumb.clone()) },
            { "node": node("4", 1, thumb.clone()) }
        ]);
        Mock::given(method("GET"))
            .and(path("/graphql/query/"))
            .and(query_param("query_hash", QUERY_HASH))
            .and(query_param("variables", query_variables("99", Some("c1"))))
            .respond_with(ResponseTemplate::new(200).set_body_json(second))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/t.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1, 2], "image/jpeg"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetches_caches_and_renders_a_profile() {
        let server = MockServer::start().await;
        mount_site(&server).await;
        let dir = tempfile::tempdir().unwrap();
        let config = config(&server, dir.path());

        process_site(config.clone()).await.unwrap();

        let cache = Cache::new(&config.cache_dir);
        assert_eq!(cache.get_all("alice").await.len(), 4);
        assert_eq!(cache.get_profile("alice").await.unwrap().id, "99");
        assert!(dir.path().join("html/alice/thumbs/sc2.jpg").exists());
        assert!(!dir.path().join("html/alice/thumbs/sc4.jpg").exists());
        assert!(dir.path().join("session.txt").exists());

        let html = std::fs::read_to_string(dir.path().join("html/alice.html")).unwrap();
        let order: Vec<_> = ["sc2", "sc3", "sc1"]
            .iter()
            .map(|sc| html.find(&format!("/p/{sc}/")).unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
        assert!(!html.contains("/p/sc4/"));
    }

    #[tokio::test]
    async fn dump_mode_appends_feed_lines_instead_of_rendering() {
        let server = MockServer::start().await;
        mount_site(&server).await;
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            dump: true,
            ..config(&server, dir.path())
        };

        process_site(config).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("html/alice.dump")).unwrap();
        let fields: Vec<Vec<_>> = text.lines().map(|l| l.split('|').collect()).collect();
        let codes: Vec<_> = fields.iter().map(|f| f[4]).collect();
        assert_eq!(codes, vec!["sc1", "sc2", "sc3", "sc4"]);
        assert_eq!(fields[1][2], "50");
        assert_eq!(fields[1][3], "False");
        assert!(!dir.path().join("html/alice.html").exists());
        assert!(!dir.path().join("html/alice/thumbs").exists());
    }

    #[tokio::test]
    async fn existing_cache_avoids_the_network() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            skip_thumbs: true,
            ..config(&server, dir.path())
        };
        let cache = Cache::new(&config.cache_dir);
        let profile = Profile {
            id: "99".into(),
            username: "alice".into(),
            ..Default::default()
        };
        cache.put_profile("alice", &profile).await.unwrap();
        cache
            .put("alice", Some("sc1"), &node("1", 3, "https://cdn.example/1.jpg".into()))
            .await
            .unwrap();

        let mut scraper = Scraper::new(config).await.unwrap();
        let (loaded, items) = scraper.collect("alice").await.unwrap();
        assert_eq!(loaded, profile);
        assert_eq!(items.len(), 1);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_site_without_cache_yields_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();

        let mut scraper = Scraper::new(config(&server, dir.path())).await.unwrap();
        assert!(scraper.process_profile("alice").await.unwrap().is_none());
        // Authentication is only attempted once per run.
        assert!(scraper.process_profile("bob").await.unwrap().is_none());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
