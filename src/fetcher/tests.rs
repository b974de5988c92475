use super::*;
use chrono::NaiveDate;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn base_url() -> Url {
    Url::parse("http://oa.example.edu.cn").expect("url should parse")
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date should parse")
}

const LISTING_HTML: &str = r#"
<html><body>
<table>
<tbody>
  <tr class="datalight">
    <td><a href="/notice/view.jsp?id=101" title="国家奖学金候选人公示">国家奖学金候选人公示</a></td>
    <td>商学院</td>
    <td>2024-05-06</td>
  </tr>
  <tr class="datalight">
    <td><a href="/notice/view.jsp?id=102">关于调整作息时间的通知</a></td>
    <td></td>
    <td>2024-05-06</td>
  </tr>
  <tr class="datalight">
    <td><a href="/notice/view.jsp?id=99">旧通知</a></td>
    <td>教务处</td>
    <td>2024-05-05</td>
  </tr>
  <tr class="datalight">
    <td>无链接的行</td>
    <td>教务处</td>
    <td>2024-05-06</td>
  </tr>
  <tr class="datalight">
    <td><a href="/notice/view.jsp?id=103">日期损坏的行</a></td>
    <td>教务处</td>
    <td>not-a-date</td>
  </tr>
</tbody>
</table>
</body></html>
"#;

#[test]
fn listing_filters_by_date_and_skips_bad_rows() {
    let candidates = extract::parse_listing(LISTING_HTML, date("2024-05-06"), &base_url());

    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].title, "国家奖学金候选人公示");
    assert_eq!(candidates[0].unit.as_deref(), Some("商学院"));
    assert_eq!(
        candidates[0].link,
        "http://oa.example.edu.cn/notice/view.jsp?id=101"
    );
    assert_eq!(candidates[0].published_on, date("2024-05-06"));

    // Empty unit cell maps to None; title falls back to the anchor text.
    assert_eq!(candidates[1].title, "关于调整作息时间的通知");
    assert_eq!(candidates[1].unit, None);
}

#[test]
fn listing_for_other_date_is_empty() {
    let candidates = extract::parse_listing(LISTING_HTML, date("2024-05-07"), &base_url());
    assert!(candidates.is_empty());
}

#[test]
fn listing_tolerates_garbage_markup() {
    let candidates = extract::parse_listing("<html>not a table</html>", date("2024-05-06"), &base_url());
    assert!(candidates.is_empty());
}

const DETAIL_HTML: &str = r#"
<html><body>
<span id="spanContent">
  <table class="viewform"><tr><td><p>发布单位：商学院</p></td></tr></table>
  <p>各位同学：</p>
  <p>现将2024年国家奖学金候选人名单予以公示，<b>公示期</b>为5个工作日。</p>
  <p>   </p>
  <p>相关附件请见下方。</p>
  <script>var tracked = true;</script>
  <table>
    <tbody>
      <tr id="accessory_dsp_tr_1">
        <td>1.</td>
        <td>候选人名单.xlsx</td>
        <td><button onclick="window.open('/weaver/weaver.file.FileDownload?fileid=8801')">下载</button></td>
      </tr>
    </tbody>
  </table>
</span>
</body></html>
"#;

#[test]
fn detail_extracts_paragraphs_and_attachments() {
    let page = extract::parse_detail(DETAIL_HTML, &base_url());

    assert_eq!(page.attachments.len(), 1);
    assert_eq!(page.attachments[0].name, "候选人名单.xlsx");
    assert_eq!(
        page.attachments[0].url,
        "http://oa.example.edu.cn/weaver/weaver.file.FileDownload?fileid=8801"
    );

    // Metadata table, empty paragraphs, and attachment boilerplate are
    // stripped; real paragraphs survive with breaks between them.
    assert!(page.content.contains("各位同学："));
    assert!(page.content.contains("公示期"));
    assert!(!page.content.contains("发布单位：商学院"));
    assert!(!page.content.contains("相关附件请见下方"));
    assert!(!page.content.contains("var tracked"));

    // The attachment listing is appended as plain text.
    assert!(page.content.contains("附件: 候选人名单.xlsx"));
}

#[test]
fn detail_without_paragraph_markup_falls_back_to_lines() {
    let html = r#"<html><body><span id="spanContent">第一行<br>第二行</span></body></html>"#;
    let page = extract::parse_detail(html, &base_url());
    assert!(page.content.contains("第一行"));
    assert!(page.content.contains("第二行"));
    assert!(page.attachments.is_empty());
}

#[tokio::test]
async fn list_candidates_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING_HTML))
        .mount(&server)
        .await;

    let config = crate::config::SourceConfig {
        base_url: "http://oa.example.edu.cn".to_string(),
        list_url: format!("{}/list", server.uri()),
        ..Default::default()
    };
    let client = SourceClient::new(&config).expect("client should build");

    let candidates =
        tokio::task::spawn_blocking(move || client.list_candidates(date("2024-05-06")))
            .await
            .expect("task should join");
    assert_eq!(candidates.len(), 2);
}

#[tokio::test]
async fn list_candidates_fails_soft_on_500() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = crate::config::SourceConfig {
        list_url: format!("{}/list", server.uri()),
        ..Default::default()
    };
    let client = SourceClient::new(&config).expect("client should build");

    let candidates =
        tokio::task::spawn_blocking(move || client.list_candidates(date("2024-05-06")))
            .await
            .expect("task should join");
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn fetch_detail_fails_soft_on_transport_error() {
    // Port from a server that has been shut down refuses connections.
    let server = MockServer::start().await;
    let dead_url = format!("{}/notice", server.uri());
    drop(server);

    let config = crate::config::SourceConfig::default();
    let client = SourceClient::new(&config).expect("client should build");

    let page = tokio::task::spawn_blocking(move || client.fetch_detail(&dead_url))
        .await
        .expect("task should join");
    assert!(page.content.is_empty());
    assert!(page.attachments.is_empty());
}
