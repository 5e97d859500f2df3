use crate::api::draft::TweetDraft;
use crate::api::fields::Fields;
use crate::api::types::{CreatedTweet, DeletedResult, ListResponse, SingleResponse, Tweet, TweetCount};
use crate::api::{ApiClientError, XApiClient, decode, require};
use crate::auth::AuthClient;

/// Which counts endpoint to query. `All` needs full-archive access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountsEndpoint {
    #[default]
    Recent,
    All,
}

impl CountsEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            Self::Recent => "/2/tweets/counts/recent",
            Self::All => "/2/tweets/counts/all",
        }
    }
}

impl<A: AuthClient> XApiClient<A> {
    /// Search tweets from the last seven days. `query` must be set.
    ///
    /// Call again while [`XApiClient::more`] is true to walk the pages.
    pub async fn search_recent(&mut self, fields: &Fields) -> Result<ListResponse<Tweet>, ApiClientError> {
        require(fields, "query")?;
        let url = self.url("/2/tweets/search/recent");
        decode(self.get(&url, fields).await?)
    }

    /// Tweet volume per `granularity` bucket for a query.
    pub async fn tweet_counts(
        &mut self,
        endpoint: CountsEndpoint,
        fields: &Fields,
    ) -> Result<ListResponse<TweetCount>, ApiClientError> {
        require(fields, "query")?;
        let url = self.url(endpoint.path());
        decode(self.get(&url, fields).await?)
    }

    /// Look up to 100 tweets by id. Not paginated.
    pub async fn lookup_tweets(&mut self, fields: &Fields) -> Result<Vec<Tweet>, ApiClientError> {
        require(fields, "ids")?;
        let url = self.url("/2/tweets");
        let page: ListResponse<Tweet> = decode(self.get(&url, fields).await?)?;
        Ok(page.data.unwrap_or_default())
    }

    pub fn new_tweet(&self, auto_truncate: bool) -> TweetDraft {
        TweetDraft::new(auto_truncate)
    }

    pub async fn send_tweet(&mut self, draft: &TweetDraft) -> Result<SingleResponse<CreatedTweet>, ApiClientError> {
        let url = self.url("/2/tweets");
        decode(self.post(&url, &draft.payload()).await?)
    }

    pub async fn delete_tweet(&mut self, tweet_id: &str) -> Result<SingleResponse<DeletedResult>, ApiClientError> {
        let url = self.url(&format!("/2/tweets/{tweet_id}"));
        decode(self.delete(&url).await?)
    }
}
